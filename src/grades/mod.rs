pub mod differ;
pub mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use differ::{diff_courses, ChangeKind, ChangeRecord, DiffSummary};
pub use normalize::normalize_rows;

/// One row of the grade table. `name` is the key within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub name: String,
    pub exam_summary: String,
    pub letter_grade: String,
    pub result: String,
}

impl CourseRecord {
    pub fn new(
        name: impl Into<String>,
        exam_summary: impl Into<String>,
        letter_grade: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            exam_summary: exam_summary.into(),
            letter_grade: letter_grade.into(),
            result: result.into(),
        }
    }

    /// True when any of the mutable fields differ.
    pub fn differs_from(&self, other: &CourseRecord) -> bool {
        self.exam_summary != other.exam_summary
            || self.letter_grade != other.letter_grade
            || self.result != other.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub courses: Vec<CourseRecord>,
}

impl Snapshot {
    pub fn new(courses: Vec<CourseRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            courses,
        }
    }
}
