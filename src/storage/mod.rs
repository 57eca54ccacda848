mod repository;
mod unit_of_work;

pub use repository::*;
pub use unit_of_work::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
/// ordering matches time ordering.
pub(crate) fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
