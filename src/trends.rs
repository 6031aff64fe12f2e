use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Utc};

use crate::models::{ComparisonRow, MonthBucket, PerformanceRow, SubjectScore};
use crate::normalize::{normalize, subjects_in, CanonicalRecord, RawRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendWindow {
    SixMonths,
    OneYear,
    TwoYears,
}

impl TrendWindow {
    pub fn months(self) -> u32 {
        match self {
            TrendWindow::SixMonths => 6,
            TrendWindow::OneYear => 12,
            TrendWindow::TwoYears => 24,
        }
    }
}

impl FromStr for TrendWindow {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "6months" => Ok(TrendWindow::SixMonths),
            "1year" => Ok(TrendWindow::OneYear),
            "2years" => Ok(TrendWindow::TwoYears),
            other => Err(format!(
                "unknown trend window '{other}' (expected 6months, 1year or 2years)"
            )),
        }
    }
}

impl fmt::Display for TrendWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrendWindow::SixMonths => "6months",
            TrendWindow::OneYear => "1year",
            TrendWindow::TwoYears => "2years",
        };
        f.write_str(label)
    }
}

/// Consecutive calendar months ending at the month of `today`, oldest first.
pub fn month_buckets(window: TrendWindow, today: NaiveDate) -> Vec<MonthBucket> {
    let count = window.months() as i32;
    let anchor = today.year() * 12 + today.month0() as i32;

    (0..count)
        .rev()
        .filter_map(|offset| {
            let index = anchor - offset;
            let year = index.div_euclid(12);
            let month = index.rem_euclid(12) as u32 + 1;
            NaiveDate::from_ymd_opt(year, month, 1)
        })
        .map(|first| MonthBucket {
            label: first.format("%b %Y").to_string(),
            year: first.format("%Y").to_string(),
            month: first.format("%m").to_string(),
        })
        .collect()
}

/// Mean of the usable scores, rounded. Records without a score signal are
/// left out rather than counted as zero.
fn rounded_mean<'a>(records: impl Iterator<Item = &'a CanonicalRecord>) -> Option<i64> {
    let (total, count) = records
        .filter_map(normalize)
        .fold((0.0_f64, 0usize), |(total, count), value| {
            (total + value, count + 1)
        });

    if count == 0 {
        None
    } else {
        Some((total / count as f64).round() as i64)
    }
}

fn same_subject(record: &CanonicalRecord, subject: &str) -> bool {
    record
        .subject
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(subject.trim()))
}

pub fn build_trend(
    records: &[RawRecord],
    window: TrendWindow,
    subjects: &[String],
) -> Vec<PerformanceRow> {
    build_trend_at(records, window, subjects, Utc::now().date_naive())
}

/// Records only carry a year, so every bucket of the same year sees the
/// same records.
pub fn build_trend_at(
    records: &[RawRecord],
    window: TrendWindow,
    subjects: &[String],
    today: NaiveDate,
) -> Vec<PerformanceRow> {
    let canonical: Vec<CanonicalRecord> = records.iter().map(RawRecord::canonical).collect();

    month_buckets(window, today)
        .into_iter()
        .map(|bucket| {
            let mut values = BTreeMap::new();
            for subject in subjects {
                let matching = canonical.iter().filter(|record| {
                    record.year.as_deref() == Some(bucket.year.as_str())
                        && same_subject(record, subject)
                });
                if let Some(mean) = rounded_mean(matching) {
                    values.insert(subject.clone(), mean);
                }
            }
            PerformanceRow {
                month: bucket.label,
                values,
            }
        })
        .collect()
}

/// Peer averages are filled in by the caller; this only reserves the keys.
pub fn build_comparison(
    records: &[RawRecord],
    subjects: &[String],
    peer_groups: &[String],
) -> Vec<ComparisonRow> {
    let canonical: Vec<CanonicalRecord> = records.iter().map(RawRecord::canonical).collect();

    subjects
        .iter()
        .map(|subject| ComparisonRow {
            subject: subject.clone(),
            student_score: rounded_mean(canonical.iter().filter(|r| same_subject(r, subject))),
            peer_averages: peer_groups.iter().map(|group| (group.clone(), None)).collect(),
        })
        .collect()
}

/// Subjects present in the records, plus the selected one when the student
/// has nothing recorded for it, so it still gets a row (with no score).
pub fn comparison_subjects(records: &[RawRecord], selected: Option<&str>) -> Vec<String> {
    let canonical: Vec<CanonicalRecord> = records.iter().map(RawRecord::canonical).collect();
    let mut subjects = subjects_in(&canonical);
    if let Some(selected) = selected.map(str::trim).filter(|s| !s.is_empty()) {
        if !subjects.iter().any(|s| s.eq_ignore_ascii_case(selected)) {
            subjects.push(selected.to_string());
        }
    }
    subjects
}

/// Per-subject mean and number of scored records, for leaderboard entries.
/// Subjects with no usable score are left out.
pub fn summarize_subjects(records: &[RawRecord]) -> Vec<SubjectScore> {
    let canonical: Vec<CanonicalRecord> = records.iter().map(RawRecord::canonical).collect();

    subjects_in(&canonical)
        .into_iter()
        .filter_map(|subject| {
            let scores: Vec<f64> = canonical
                .iter()
                .filter(|record| same_subject(record, &subject))
                .filter_map(normalize)
                .collect();
            if scores.is_empty() {
                return None;
            }
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            Some(SubjectScore {
                name: subject,
                score: (mean * 10.0).round() / 10.0,
                test_count: scores.len() as i64,
            })
        })
        .collect()
}
