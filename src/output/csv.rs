use anyhow::Result;

use crate::grades::{ChangeRecord, Snapshot};

pub fn snapshot_to_csv(snapshot: &Snapshot) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["course", "exams", "letter_grade", "result"])?;
    for course in &snapshot.courses {
        writer.write_record([
            course.name.as_str(),
            course.exam_summary.as_str(),
            course.letter_grade.as_str(),
            course.result.as_str(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn changes_to_csv(changes: &[ChangeRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["course", "kind", "exams", "letter_grade", "result"])?;
    for change in changes {
        writer.write_record([
            change.course_name.clone(),
            format!("{:?}", change.kind()).to_lowercase(),
            change.current.exam_summary.clone(),
            change.current.letter_grade.clone(),
            change.current.result.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::CourseRecord;

    #[test]
    fn snapshot_csv_quotes_embedded_commas() {
        let snapshot = Snapshot::new(vec![CourseRecord::new(
            "Algorithms",
            "Midterm: 70, Final: 80",
            "BA",
            "Passed",
        )]);
        let csv = snapshot_to_csv(&snapshot).expect("csv");
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("course,exams,letter_grade,result"));
        assert_eq!(
            lines.next(),
            Some("Algorithms,\"Midterm: 70, Final: 80\",BA,Passed")
        );
    }

    #[test]
    fn change_rows_carry_kind() {
        let changes = vec![ChangeRecord {
            course_name: "Databases".to_string(),
            previous: None,
            current: CourseRecord::new("Databases", "-", "-", "-"),
        }];
        let csv = changes_to_csv(&changes).expect("csv");
        assert!(csv.contains("Databases,new,-,-,-"));
    }
}
