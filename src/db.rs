use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SourceError;
use crate::models::{
    Pagination, RankedEntity, RankingFilters, RankingResponse, RecordFilter, SubjectScore,
};
use crate::normalize::{score_to_grade, RawRecord};
use crate::sources::{RankingSource, RecordSource};
use crate::trends::summarize_subjects;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub city: Option<String>,
}

async fn upsert_student(
    pool: &PgPool,
    full_name: &str,
    email: &str,
    city: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO performance_insights.students (id, full_name, email, city)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name, city = COALESCE(EXCLUDED.city, students.city)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .bind(city)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert student {email}"))?
    .get("id");
    Ok(id)
}

async fn insert_record(
    pool: &PgPool,
    child_id: Uuid,
    record_type: &str,
    payload: &Value,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO performance_insights.records
        (id, child_id, record_type, payload, source_key)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(child_id)
    .bind(record_type)
    .bind(payload)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Loads a small realistic data set. Older entries use the flat record
/// shape, newer ones the `data`-nested one, so both paths get exercised.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = [
        ("Avery Lee", "avery.lee@groupscholar.com", "Chicago"),
        ("Jules Moreno", "jules.moreno@groupscholar.com", "Austin"),
        ("Kiara Patel", "kiara.patel@groupscholar.com", "Chicago"),
    ];

    let mut ids = HashMap::new();
    for (name, email, city) in students {
        let id = upsert_student(pool, name, email, Some(city)).await?;
        ids.insert(email, id);
    }

    let records = [
        (
            "seed-001",
            "avery.lee@groupscholar.com",
            json!({ "type": "academic", "subject": "Math", "year": "2025", "grade": "B+" }),
        ),
        (
            "seed-002",
            "avery.lee@groupscholar.com",
            json!({ "type": "academic", "data": { "subject": "Math", "year": 2026, "score": 91 } }),
        ),
        (
            "seed-003",
            "avery.lee@groupscholar.com",
            json!({ "type": "academic", "data": { "subject": "Science", "year": 2026, "grade": "A" } }),
        ),
        (
            "seed-004",
            "jules.moreno@groupscholar.com",
            json!({ "type": "academic", "subject": "Math", "year": "2026", "grade": "78%" }),
        ),
        (
            "seed-005",
            "jules.moreno@groupscholar.com",
            json!({ "type": "academic", "data": { "subject": "History", "year": 2026, "grade": "C+" } }),
        ),
        (
            "seed-006",
            "kiara.patel@groupscholar.com",
            json!({ "type": "academic", "data": { "subject": "Science", "year": 2026, "score": 94.5 } }),
        ),
        (
            "seed-007",
            "kiara.patel@groupscholar.com",
            json!({ "type": "achievement", "data": { "title": "Regional science fair finalist", "year": 2026 } }),
        ),
    ];

    for (source_key, email, payload) in records {
        let child_id = ids
            .get(email)
            .copied()
            .with_context(|| format!("seed record references unknown student {email}"))?;
        let record_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("academic")
            .to_string();
        insert_record(pool, child_id, &record_type, &payload, source_key).await?;
    }

    rebuild_leaderboard(pool).await?;
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        city: Option<String>,
        record_type: String,
        subject: String,
        year: String,
        score: Option<f64>,
        grade: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 2))?;
        let child_id = upsert_student(pool, &row.full_name, &row.email, row.city.as_deref()).await?;

        let payload = json!({
            "type": row.record_type,
            "data": {
                "subject": row.subject,
                "year": row.year,
                "score": row.score,
                "grade": row.grade,
            }
        });
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_record(pool, child_id, &row.record_type, &payload, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn find_student(pool: &PgPool, email: &str) -> anyhow::Result<Student> {
    let row = sqlx::query(
        "SELECT id, full_name, email, city FROM performance_insights.students WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("no student registered with email {email}"))?;

    Ok(Student {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        city: row.get("city"),
    })
}

pub async fn fetch_records(
    pool: &PgPool,
    filter: &RecordFilter,
) -> Result<Vec<RawRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT payload
        FROM performance_insights.records
        WHERE child_id = $1
          AND ($2::text IS NULL OR record_type = $2::text)
        ORDER BY created_at
        "#,
    )
    .bind(filter.child_id)
    .bind(filter.record_type.as_deref())
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let payload: Value = row.try_get("payload")?;
        if let Some(record) = RawRecord::from_value(payload) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Recomputes every leaderboard entry from the academic records.
pub async fn rebuild_leaderboard(pool: &PgPool) -> anyhow::Result<usize> {
    let students = sqlx::query("SELECT id FROM performance_insights.students")
        .fetch_all(pool)
        .await?;

    let mut updated = 0usize;
    for row in students {
        let student_id: Uuid = row.get("id");
        let filter = RecordFilter {
            child_id: student_id,
            record_type: Some("academic".to_string()),
        };
        let records = fetch_records(pool, &filter).await?;
        let subjects = summarize_subjects(&records);
        if subjects.is_empty() {
            continue;
        }

        let overall = subjects.iter().map(|s| s.score).sum::<f64>() / subjects.len() as f64;
        let overall = (overall * 10.0).round() / 10.0;
        sqlx::query(
            r#"
            INSERT INTO performance_insights.leaderboard_entries
            (student_id, overall_score, grade, subjects, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (student_id) DO UPDATE
            SET overall_score = EXCLUDED.overall_score,
                grade = EXCLUDED.grade,
                subjects = EXCLUDED.subjects,
                updated_at = now()
            "#,
        )
        .bind(student_id)
        .bind(overall)
        .bind(score_to_grade(overall))
        .bind(serde_json::to_value(&subjects)?)
        .execute(pool)
        .await?;
        updated += 1;
    }

    info!(updated, "leaderboard rebuilt");
    Ok(updated)
}

/// Postgres-backed record and ranking source.
#[derive(Debug, Clone)]
pub struct PgSources {
    pool: PgPool,
}

impl PgSources {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSource for PgSources {
    async fn records(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError> {
        Ok(fetch_records(&self.pool, filter).await?)
    }
}

/// Page or limit of 0 is rejected before any query runs.
pub fn check_paging(filters: &RankingFilters) -> Result<(), SourceError> {
    if filters.page == 0 || filters.limit == 0 {
        return Err(SourceError::Status {
            code: 400,
            message: "page and limit must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// A subject nobody in scope has scores for is dropped, so the page is
/// built for "all subjects" and the caller sees the filter reset.
pub fn effective_subject<'a>(requested: Option<&'a str>, offered: &[String]) -> Option<&'a str> {
    requested.filter(|subject| offered.iter().any(|s| s == subject))
}

/// Page metadata for `total` matching entries. An empty scope is a 404.
pub fn page_metadata(filters: &RankingFilters, total: i64) -> Result<Pagination, SourceError> {
    if total <= 0 {
        return Err(SourceError::Status {
            code: 404,
            message: "no leaderboard entries match".to_string(),
        });
    }

    let total = total as u64;
    let total_pages = total.div_ceil(u64::from(filters.limit.max(1))) as u32;
    Ok(Pagination {
        total,
        page: filters.page,
        total_pages,
        has_more: filters.page < total_pages,
    })
}

#[async_trait]
impl RankingSource for PgSources {
    async fn ranking(&self, filters: &RankingFilters) -> Result<RankingResponse, SourceError> {
        check_paging(filters)?;
        let city = filters.city.as_deref();

        // count, page and subject list must come from one snapshot
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let subjects: Vec<String> = sqlx::query(
            r#"
            SELECT DISTINCT s ->> 'name' AS name
            FROM performance_insights.leaderboard_entries le
            JOIN performance_insights.students st ON st.id = le.student_id
            CROSS JOIN LATERAL jsonb_array_elements(le.subjects) s
            WHERE ($1::text IS NULL OR st.city = $1::text)
            ORDER BY 1
            "#,
        )
        .bind(city)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
        .collect();

        let subject = effective_subject(filters.subject.as_deref(), &subjects);
        if subject.is_none() {
            if let Some(requested) = filters.subject.as_deref() {
                debug!(subject = requested, "subject not offered, ranking all subjects");
            }
        }

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM performance_insights.leaderboard_entries le
            JOIN performance_insights.students st ON st.id = le.student_id
            WHERE ($1::text IS NULL
                   OR le.subjects @> jsonb_build_array(jsonb_build_object('name', $1::text)))
              AND ($2::text IS NULL OR st.city = $2::text)
            "#,
        )
        .bind(subject)
        .bind(city)
        .fetch_one(&mut *tx)
        .await?
        .try_get("total")?;

        let pagination = page_metadata(filters, total)?;

        let offset = i64::from(filters.page - 1) * i64::from(filters.limit);
        let rows = sqlx::query(
            r#"
            WITH scoped AS (
                SELECT st.id, st.full_name, le.grade, le.subjects,
                       COALESCE(
                           (SELECT (s ->> 'score')::float8
                              FROM jsonb_array_elements(le.subjects) s
                             WHERE s ->> 'name' = $1::text
                             LIMIT 1),
                           le.overall_score
                       ) AS score
                FROM performance_insights.leaderboard_entries le
                JOIN performance_insights.students st ON st.id = le.student_id
                WHERE ($1::text IS NULL
                       OR le.subjects @> jsonb_build_array(jsonb_build_object('name', $1::text)))
                  AND ($2::text IS NULL OR st.city = $2::text)
            )
            SELECT id, full_name, grade, subjects, score,
                   RANK() OVER (ORDER BY score DESC)::int8 AS rank
            FROM scoped
            ORDER BY score DESC, full_name
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(subject)
        .bind(city)
        .bind(i64::from(filters.limit))
        .bind(offset)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            let subjects: Value = row.try_get("subjects")?;
            let subjects: Vec<SubjectScore> = serde_json::from_value(subjects)
                .map_err(|err| SourceError::Other(format!("malformed subject scores: {err}")))?;
            data.push(RankedEntity {
                id: row.try_get("id")?,
                name: row.try_get("full_name")?,
                rank: row.try_get("rank")?,
                score: row.try_get("score")?,
                grade: row.try_get("grade")?,
                subjects,
            });
        }

        debug!(
            total = pagination.total,
            total_pages = pagination.total_pages,
            entries = data.len(),
            "ranking page loaded"
        );

        Ok(RankingResponse {
            data,
            pagination,
            subjects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(page: u32, limit: u32) -> RankingFilters {
        RankingFilters {
            page,
            limit,
            ..RankingFilters::default()
        }
    }

    fn status_code(err: SourceError) -> u16 {
        match err {
            SourceError::Status { code, .. } => code,
            other => panic!("expected a status error, got {other:?}"),
        }
    }

    #[test]
    fn zero_page_or_limit_is_a_validation_error() {
        assert_eq!(status_code(check_paging(&filters(0, 10)).unwrap_err()), 400);
        assert_eq!(status_code(check_paging(&filters(1, 0)).unwrap_err()), 400);
        assert!(check_paging(&filters(1, 10)).is_ok());
    }

    #[test]
    fn empty_scope_is_not_found() {
        assert_eq!(status_code(page_metadata(&filters(1, 10), 0).unwrap_err()), 404);
    }

    #[test]
    fn pages_round_up_and_flag_more() {
        let first = page_metadata(&filters(1, 10), 25).unwrap();
        assert_eq!((first.total, first.total_pages), (25, 3));
        assert!(first.has_more);

        let last = page_metadata(&filters(3, 10), 25).unwrap();
        assert!(!last.has_more);

        let exact = page_metadata(&filters(2, 10), 20).unwrap();
        assert_eq!(exact.total_pages, 2);
        assert!(!exact.has_more);
    }

    #[test]
    fn unknown_subject_widens_to_all() {
        let offered = vec!["Math".to_string(), "Science".to_string()];
        assert_eq!(effective_subject(Some("Math"), &offered), Some("Math"));
        assert_eq!(effective_subject(Some("Physics"), &offered), None);
        assert_eq!(effective_subject(None, &offered), None);
        assert_eq!(effective_subject(Some("Math"), &[]), None);
    }
}
