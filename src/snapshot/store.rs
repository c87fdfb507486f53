use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, MonitorResult};
use crate::grades::Snapshot;

/// Single-file JSON store holding the last successful snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when nothing has been stored yet.
    pub fn load(&self) -> MonitorResult<Option<Snapshot>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MonitorError::persistence(format!(
                    "failed reading snapshot {}: {e}",
                    self.path.display()
                )))
            }
        };
        let snapshot = serde_json::from_str(&data).map_err(|e| {
            MonitorError::persistence(format!(
                "corrupt snapshot {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(snapshot))
    }

    /// Replaces the stored snapshot. The write goes through a sibling temp file
    /// so readers never observe a half-written document.
    pub fn save(&self, snapshot: &Snapshot) -> MonitorResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    MonitorError::persistence(format!(
                        "failed creating snapshot directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(snapshot).map_err(MonitorError::persistence)?;
        let tmp_path = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            MonitorError::persistence(format!(
                "failed writing snapshot {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::CourseRecord;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("grades.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn save_then_load_returns_same_courses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("nested/state/grades.json"));
        let snapshot = Snapshot::new(vec![
            CourseRecord::new("Algorithms", "70", "BA", "Passed"),
            CourseRecord::new("Databases", "-", "-", "-"),
        ]);

        tokio_test::assert_ok!(store.save(&snapshot));
        let loaded = store.load().expect("load").expect("snapshot present");
        assert_eq!(loaded, snapshot);
        assert!(!dir.path().join("nested/state/grades.json.tmp").exists());
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("grades.json"));
        store
            .save(&Snapshot::new(vec![CourseRecord::new("Old", "-", "-", "-")]))
            .expect("first save");
        store
            .save(&Snapshot::new(vec![CourseRecord::new("New", "-", "-", "-")]))
            .expect("second save");

        let loaded = store.load().expect("load").expect("snapshot present");
        assert_eq!(loaded.courses.len(), 1);
        assert_eq!(loaded.courses[0].name, "New");
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grades.json");
        fs::write(&path, "{ not json").expect("write");
        let store = SnapshotStore::new(path);
        assert!(matches!(store.load(), Err(MonitorError::Persistence(_))));
    }

    #[test]
    fn stored_document_uses_expected_field_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grades.json");
        let store = SnapshotStore::new(&path);
        store
            .save(&Snapshot::new(vec![CourseRecord::new(
                "Algorithms",
                "70",
                "BA",
                "Passed",
            )]))
            .expect("save");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert!(raw["timestamp"].is_string());
        let course = &raw["courses"][0];
        assert_eq!(course["name"], "Algorithms");
        assert_eq!(course["exam_summary"], "70");
        assert_eq!(course["letter_grade"], "BA");
        assert_eq!(course["result"], "Passed");
    }
}
