//! Performance analytics and ranking engine for Group Scholar.
//!
//! Raw per-student records are normalized to a 0..100 scale, bucketed into
//! monthly trends and subject comparisons, and exported as a paginated
//! report. Leaderboard pages are loaded through [`ranking::RankingController`],
//! which only ever applies the most recently requested page.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pagination;
pub mod ranking;
pub mod report;
pub mod sources;
pub mod trends;
