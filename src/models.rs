use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedScore {
    pub subject: String,
    pub year: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthBucket {
    pub label: String,
    pub year: String,
    pub month: String,
}

/// One trend row per month bucket. A subject key is only present when at
/// least one scored record fell into the bucket for that subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRow {
    pub month: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, i64>,
}

impl PerformanceRow {
    pub fn value(&self, subject: &str) -> Option<i64> {
        self.values.get(subject).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub subject: String,
    pub student_score: Option<i64>,
    pub peer_averages: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub name: String,
    pub score: f64,
    pub test_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    pub id: Uuid,
    pub name: String,
    pub rank: i64,
    pub score: f64,
    pub grade: String,
    pub subjects: Vec<SubjectScore>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResponse {
    pub data: Vec<RankedEntity>,
    pub pagination: Pagination,
    pub subjects: Vec<String>,
}

/// Query sent to a ranking source. `subject` and `city` of `None` mean "all".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingFilters {
    pub page: u32,
    pub limit: u32,
    pub subject: Option<String>,
    pub city: Option<String>,
}

impl Default for RankingFilters {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            subject: None,
            city: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub child_id: Uuid,
    pub record_type: Option<String>,
}
