//! High-water-mark resolution.
//!
//! The mark is the inclusive lower bound (`YYYY-MM-DD`) of the next fetch.
//! It trails the newest stored occurrence by [`OVERLAP_DAYS`] so records
//! that show up upstream with a back-dated occurrence after the previous
//! run are still picked up. Re-fetched records are harmlessly updated.

use chrono::{DateTime, Duration, Utc};
use vision_zero_database::store::IncidentStore;

use crate::SyncError;

/// Days subtracted from the newest stored `first_occurrence_date`.
pub const OVERLAP_DAYS: i64 = 1;

/// Computes the mark for a store whose newest record occurred at `latest`.
#[must_use]
pub fn mark_from_latest(latest: DateTime<Utc>) -> String {
    (latest - Duration::days(OVERLAP_DAYS))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string()
}

/// Resolves the high-water mark for this run.
///
/// 1. `override_mark`, if set, is returned verbatim without validation.
/// 2. Otherwise the mark is derived from the newest stored record.
/// 3. If the store is empty, `initial_mark` is used when configured.
///
/// # Errors
///
/// Returns [`SyncError::EmptyStore`] if the store is empty and no initial
/// mark is configured, or [`SyncError::Database`] if the lookup fails.
pub async fn resolve_high_water_mark(
    store: &dyn IncidentStore,
    override_mark: Option<&str>,
    initial_mark: Option<&str>,
) -> Result<String, SyncError> {
    if let Some(mark) = override_mark {
        log::info!("Using high-water mark override {mark}");
        return Ok(mark.to_string());
    }

    match store.max_first_occurrence_date().await? {
        Some(latest) => {
            let mark = mark_from_latest(latest);
            log::info!(
                "Incremental sync from {mark} ({OVERLAP_DAYS}-day overlap from latest {})",
                latest.format("%Y-%m-%d %H:%M:%S"),
            );
            Ok(mark)
        }
        None => initial_mark.map_or(Err(SyncError::EmptyStore), |mark| {
            log::info!("Store is empty; starting from initial high-water mark {mark}");
            Ok(mark.to_string())
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn subtracts_one_day() {
        let latest = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(mark_from_latest(latest), "2024-03-09");
    }

    #[test]
    fn truncates_time_of_day() {
        let latest = Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap();
        assert_eq!(mark_from_latest(latest), "2024-03-09");
    }

    #[test]
    fn crosses_month_and_year_boundaries() {
        let latest = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(mark_from_latest(latest), "2024-02-29");
        let latest = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(mark_from_latest(latest), "2023-12-31");
    }
}
