use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{RankingFilters, RankingResponse, RecordFilter};
use crate::normalize::RawRecord;

/// Supplies raw per-child records in either legacy shape.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn records(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, SourceError>;
}

/// Supplies one page of the leaderboard plus the subjects it can be
/// filtered by.
#[async_trait]
pub trait RankingSource: Send + Sync {
    async fn ranking(&self, filters: &RankingFilters) -> Result<RankingResponse, SourceError>;
}

#[async_trait]
impl<T: RankingSource + ?Sized> RankingSource for Arc<T> {
    async fn ranking(&self, filters: &RankingFilters) -> Result<RankingResponse, SourceError> {
        (**self).ranking(filters).await
    }
}
