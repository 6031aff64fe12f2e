use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::NormalizedScore;

const GRADE_TABLE: [(&str, f64); 7] = [
    ("A+", 95.0),
    ("A", 90.0),
    ("B+", 85.0),
    ("B", 80.0),
    ("C+", 75.0),
    ("C", 70.0),
    ("D", 65.0),
];

/// A record as delivered by the record source. Older entries keep their
/// fields at the top level, newer ones nest them under `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

/// The single shape the aggregator works with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRecord {
    pub subject: Option<String>,
    pub year: Option<String>,
    pub score: Option<f64>,
    pub grade: Option<String>,
}

impl RawRecord {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Top-level field first, then the same key under `data`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0
            .get(key)
            .filter(|value| !value.is_null())
            .or_else(|| {
                self.0
                    .get("data")
                    .and_then(Value::as_object)
                    .and_then(|data| data.get(key))
                    .filter(|value| !value.is_null())
            })
    }

    pub fn canonical(&self) -> CanonicalRecord {
        let subject = self
            .field("subject")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let year = match self.field("year") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(year_from_number(n)),
            _ => self
                .field("date")
                .and_then(Value::as_str)
                .and_then(|date| date.get(..4))
                .filter(|prefix| prefix.chars().all(|c| c.is_ascii_digit()))
                .map(str::to_string),
        };

        CanonicalRecord {
            subject,
            year,
            score: self.field("score").and_then(Value::as_f64),
            grade: self
                .field("grade")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// `2024.0` and `2024` name the same year.
fn year_from_number(number: &serde_json::Number) -> String {
    match number.as_f64() {
        Some(value) if number.is_f64() && value.fract() == 0.0 && value.abs() < 1e9 => {
            format!("{}", value as i64)
        }
        _ => number.to_string(),
    }
}

pub fn normalize(record: &CanonicalRecord) -> Option<f64> {
    if let Some(score) = record.score {
        return Some(score);
    }
    record.grade.as_deref().and_then(grade_to_score)
}

pub fn normalize_raw(record: &RawRecord) -> Option<f64> {
    normalize(&record.canonical())
}

/// Letter grades map through the fixed table, `NN%` strings parse directly.
pub fn grade_to_score(grade: &str) -> Option<f64> {
    let grade = grade.trim().to_uppercase();
    if grade.ends_with('%') {
        return leading_number(&grade);
    }

    GRADE_TABLE
        .iter()
        .find(|(prefix, _)| grade.starts_with(prefix))
        .map(|(_, score)| *score)
}

/// Longest prefix that parses as a number, e.g. `85` out of `85 pts%`.
fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map_or(text.len(), |(i, _)| i);

    (1..=end)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Letter grade for a 0..100 score, using the same cut-offs as the table.
pub fn score_to_grade(score: f64) -> &'static str {
    GRADE_TABLE
        .iter()
        .find(|(_, floor)| score >= *floor)
        .map(|(grade, _)| *grade)
        .unwrap_or("F")
}

pub fn normalize_all(records: &[RawRecord]) -> Vec<NormalizedScore> {
    records
        .iter()
        .map(RawRecord::canonical)
        .map(|record| NormalizedScore {
            value: normalize(&record),
            subject: record.subject.unwrap_or_default(),
            year: record.year.unwrap_or_default(),
        })
        .collect()
}

/// Distinct subjects in first-seen order.
pub fn subjects_in(records: &[CanonicalRecord]) -> Vec<String> {
    let mut subjects: Vec<String> = Vec::new();
    for subject in records.iter().filter_map(|r| r.subject.as_ref()) {
        if !subjects.iter().any(|s| s.eq_ignore_ascii_case(subject)) {
            subjects.push(subject.clone());
        }
    }
    subjects
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    #[test]
    fn letter_grades_follow_table() {
        let expected = [
            ("A+", 95.0),
            ("A", 90.0),
            ("B+", 85.0),
            ("B", 80.0),
            ("C+", 75.0),
            ("C", 70.0),
            ("D", 65.0),
        ];
        for (grade, score) in expected {
            assert_eq!(grade_to_score(grade), Some(score), "grade {grade}");
        }
    }

    #[test]
    fn grades_are_trimmed_and_uppercased() {
        assert_eq!(grade_to_score("  b+ "), Some(85.0));
        assert_eq!(grade_to_score("a-"), Some(90.0));
    }

    #[test]
    fn percent_strings_parse_leading_number() {
        assert_eq!(grade_to_score("87%"), Some(87.0));
        assert_eq!(grade_to_score(" 72.5 % "), Some(72.5));
        assert_eq!(grade_to_score("abc%"), None);
        assert_eq!(grade_to_score("90.5%%"), Some(90.5));
        assert_eq!(grade_to_score("85 pts%"), Some(85.0));
        assert_eq!(grade_to_score("%"), None);
    }

    #[test]
    fn scores_map_back_to_grades() {
        assert_eq!(score_to_grade(97.0), "A+");
        assert_eq!(score_to_grade(90.0), "A");
        assert_eq!(score_to_grade(84.9), "B");
        assert_eq!(score_to_grade(65.0), "D");
        assert_eq!(score_to_grade(40.0), "F");
    }

    #[test]
    fn unrecognised_grade_without_score_is_none() {
        let record = raw(json!({ "subject": "Math", "grade": "F" }));
        assert_eq!(normalize_raw(&record), None);
        assert_eq!(normalize_raw(&raw(json!({ "subject": "Math" }))), None);
    }

    #[test]
    fn numeric_score_wins_over_grade() {
        let record = raw(json!({ "score": 61.5, "grade": "A+" }));
        assert_eq!(normalize_raw(&record), Some(61.5));
    }

    #[test]
    fn nested_data_shape_is_read_with_fallback() {
        let record = raw(json!({
            "type": "academic",
            "data": { "subject": "Science", "year": 2024, "grade": "B" }
        }));
        let canonical = record.canonical();
        assert_eq!(canonical.subject.as_deref(), Some("Science"));
        assert_eq!(canonical.year.as_deref(), Some("2024"));
        assert_eq!(normalize(&canonical), Some(80.0));
    }

    #[test]
    fn top_level_takes_precedence_over_nested() {
        let record = raw(json!({
            "subject": "History",
            "data": { "subject": "Art", "score": 70 }
        }));
        let canonical = record.canonical();
        assert_eq!(canonical.subject.as_deref(), Some("History"));
        assert_eq!(canonical.score, Some(70.0));
    }

    #[test]
    fn year_falls_back_to_date_prefix() {
        let record = raw(json!({ "subject": "Math", "date": "2023-09-14", "score": 88 }));
        assert_eq!(record.canonical().year.as_deref(), Some("2023"));
    }

    #[test]
    fn integral_float_year_reads_as_plain_year() {
        let record = raw(json!({ "subject": "Math", "year": 2024.0, "score": 80 }));
        assert_eq!(record.canonical().year.as_deref(), Some("2024"));
        let record = raw(json!({ "subject": "Math", "year": 2024, "score": 80 }));
        assert_eq!(record.canonical().year.as_deref(), Some("2024"));
    }

    #[test]
    fn normalize_all_keeps_null_values() {
        let records = vec![
            raw(json!({ "subject": "Math", "year": "2024", "grade": "A" })),
            raw(json!({ "subject": "Math", "year": "2024", "grade": "pass" })),
        ];
        let scores = normalize_all(&records);
        assert_eq!(scores[0].value, Some(90.0));
        assert_eq!(scores[1].value, None);
        assert_eq!(scores[1].subject, "Math");
    }

    #[test]
    fn subjects_are_distinct_in_first_seen_order() {
        let records: Vec<CanonicalRecord> = [
            json!({ "subject": "Math" }),
            json!({ "subject": "Science" }),
            json!({ "subject": "math" }),
            json!({ "grade": "A" }),
        ]
        .into_iter()
        .map(|v| raw(v).canonical())
        .collect();
        assert_eq!(subjects_in(&records), vec!["Math", "Science"]);
    }
}
