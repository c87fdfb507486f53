use anyhow::Result;
use serde::Serialize;

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::{CourseRecord, Snapshot};

    #[test]
    fn snapshot_renders_as_pretty_json() {
        let snapshot = Snapshot::new(vec![CourseRecord::new("Algorithms", "70", "BA", "Passed")]);
        let rendered = render_json(&snapshot).expect("render");
        assert!(rendered.contains("\n  \"courses\""));
        assert!(rendered.contains("\"letter_grade\": \"BA\""));
    }
}
