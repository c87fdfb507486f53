use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grades::{CourseRecord, Snapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub course_name: String,
    /// `None` when the course had not been observed before.
    pub previous: Option<CourseRecord>,
    pub current: CourseRecord,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Updated,
}

impl ChangeRecord {
    pub fn kind(&self) -> ChangeKind {
        if self.previous.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::New
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DiffSummary {
    FirstCheck,
    ChangesFound,
    NoChanges,
}

impl DiffSummary {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstCheck => "first-check",
            Self::ChangesFound => "changes-found",
            Self::NoChanges => "no-changes",
        }
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes the changes between the stored snapshot and freshly observed courses.
///
/// Courses that disappeared from `current` are not reported. Output follows the
/// encounter order of `current`.
pub fn diff_courses(
    previous: Option<&Snapshot>,
    current: &[CourseRecord],
) -> (Vec<ChangeRecord>, DiffSummary) {
    let Some(previous) = previous else {
        let changes = current
            .iter()
            .map(|course| ChangeRecord {
                course_name: course.name.clone(),
                previous: None,
                current: course.clone(),
            })
            .collect();
        return (changes, DiffSummary::FirstCheck);
    };

    let old_map: HashMap<&str, &CourseRecord> = previous
        .courses
        .iter()
        .map(|course| (course.name.as_str(), course))
        .collect();

    let mut changes = Vec::new();
    for course in current {
        match old_map.get(course.name.as_str()) {
            None => changes.push(ChangeRecord {
                course_name: course.name.clone(),
                previous: None,
                current: course.clone(),
            }),
            Some(old) if old.differs_from(course) => changes.push(ChangeRecord {
                course_name: course.name.clone(),
                previous: Some((*old).clone()),
                current: course.clone(),
            }),
            Some(_) => {}
        }
    }

    let summary = if changes.is_empty() {
        DiffSummary::NoChanges
    } else {
        DiffSummary::ChangesFound
    };
    (changes, summary)
}
