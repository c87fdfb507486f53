use std::collections::HashMap;

use tracing::debug;

use crate::grades::CourseRecord;
use crate::session::RawTable;

const MIN_CELLS: usize = 5;
const NAME_CELL: usize = 0;
const EXAM_CELL: usize = 1;
const LETTER_CELL: usize = 2;
const RESULT_CELL: usize = 4;

/// Converts raw table rows into course records in row order.
///
/// Rows with fewer than five cells are skipped. A repeated course name keeps the
/// position of its first row and the values of its last one.
pub fn normalize_rows(table: &RawTable) -> Vec<CourseRecord> {
    let mut courses: Vec<CourseRecord> = Vec::with_capacity(table.rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, row) in table.rows.iter().enumerate() {
        if row.len() < MIN_CELLS {
            debug!(row = index, cells = row.len(), "skipping malformed grade row");
            continue;
        }
        let record = CourseRecord {
            name: row[NAME_CELL].trim().to_string(),
            exam_summary: row[EXAM_CELL].trim().to_string(),
            letter_grade: row[LETTER_CELL].trim().to_string(),
            result: row[RESULT_CELL].trim().to_string(),
        };
        match positions.get(&record.name) {
            Some(&existing) => courses[existing] = record,
            None => {
                positions.insert(record.name.clone(), courses.len());
                courses.push(record);
            }
        }
    }

    courses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn maps_cells_and_skips_short_rows() {
        let table = RawTable {
            rows: vec![
                row(&["Algorithms", "Midterm: 70", "BA", "3", "Passed"]),
                row(&["footer", "only", "four", "cells"]),
                row(&["Databases", "-", "-", "4", "-", "extra"]),
            ],
        };

        let courses = normalize_rows(&table);
        assert_eq!(courses.len(), 2);
        assert_eq!(
            courses[0],
            CourseRecord::new("Algorithms", "Midterm: 70", "BA", "Passed")
        );
        assert_eq!(courses[1].name, "Databases");
        assert_eq!(courses[1].result, "-");
    }

    #[test]
    fn table_of_only_malformed_rows_yields_empty_list() {
        let table = RawTable {
            rows: vec![row(&["No courses this term"])],
        };
        assert!(normalize_rows(&table).is_empty());
    }

    #[test]
    fn duplicate_names_keep_first_position_and_last_values() {
        let table = RawTable {
            rows: vec![
                row(&["Algorithms", "70", "-", "", "-"]),
                row(&["Databases", "-", "-", "", "-"]),
                row(&["Algorithms", "70", "BA", "", "Passed"]),
            ],
        };
        let courses = normalize_rows(&table);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].name, "Algorithms");
        assert_eq!(courses[0].letter_grade, "BA");
        assert_eq!(courses[1].name, "Databases");
    }
}
