use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::grades::{ChangeKind, ChangeRecord, Snapshot};
use crate::monitor::cycle::CycleResult;

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn dash_if_empty(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

pub fn render_snapshot_table(snapshot: &Snapshot) -> String {
    let mut table = base_table();
    table.set_header(vec!["Course", "Exams", "Letter", "Result"]);
    for course in &snapshot.courses {
        let letter = dash_if_empty(&course.letter_grade);
        let letter_cell = if letter == "-" {
            Cell::new(letter)
        } else {
            Cell::new(letter).fg(Color::Green)
        };
        table.add_row(Row::from(vec![
            Cell::new(&course.name),
            Cell::new(dash_if_empty(&course.exam_summary)),
            letter_cell,
            Cell::new(dash_if_empty(&course.result)),
        ]));
    }
    table.to_string()
}

pub fn render_changes_table(changes: &[ChangeRecord]) -> String {
    let mut table = base_table();
    table.set_header(vec!["Course", "Change", "Exams", "Letter", "Result"]);
    for change in changes {
        let kind = match change.kind() {
            ChangeKind::New => Cell::new("NEW").fg(Color::Cyan),
            ChangeKind::Updated => Cell::new("UPDATED").fg(Color::Yellow),
        };
        table.add_row(Row::from(vec![
            Cell::new(&change.course_name),
            kind,
            Cell::new(dash_if_empty(&change.current.exam_summary)),
            Cell::new(dash_if_empty(&change.current.letter_grade)),
            Cell::new(dash_if_empty(&change.current.result)),
        ]));
    }
    table.to_string()
}

pub fn render_cycle_table(result: &CycleResult) -> String {
    let mut table = base_table();
    table.set_header(vec!["Cycle", "Outcome", "Summary", "Changes", "Detail"]);
    let outcome = format!("{:?}", result.outcome).to_uppercase();
    let outcome_cell = if result.outcome.is_success() {
        Cell::new(outcome).fg(Color::Green)
    } else {
        Cell::new(outcome).fg(Color::Red)
    };
    table.add_row(Row::from(vec![
        Cell::new(result.cycle),
        outcome_cell,
        Cell::new(
            result
                .summary
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        Cell::new(result.change_count),
        Cell::new(result.detail.as_deref().unwrap_or("-")),
    ]));
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::CourseRecord;

    #[test]
    fn snapshot_table_lists_every_course() {
        let snapshot = Snapshot::new(vec![
            CourseRecord::new("Algorithms", "70", "BA", "Passed"),
            CourseRecord::new("Databases", "", "", ""),
        ]);
        let rendered = render_snapshot_table(&snapshot);
        assert!(rendered.contains("Algorithms"));
        assert!(rendered.contains("Databases"));
        assert!(rendered.contains("Letter"));
    }

    #[test]
    fn changes_table_marks_kind() {
        let changes = vec![ChangeRecord {
            course_name: "Algorithms".to_string(),
            previous: Some(CourseRecord::new("Algorithms", "70", "-", "-")),
            current: CourseRecord::new("Algorithms", "70", "BA", "Passed"),
        }];
        assert!(render_changes_table(&changes).contains("UPDATED"));
    }
}
