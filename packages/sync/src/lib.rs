#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental synchronization of traffic incidents.
//!
//! One run resolves a high-water mark, fetches every upstream record on or
//! after it, asks the store which of those records it already holds, and
//! then updates the known ones and inserts the rest. Re-running against an
//! unchanged feed is idempotent.

pub mod config;
pub mod high_water_mark;
pub mod upsert;

use std::collections::BTreeMap;
use std::time::Instant;

use vision_zero_database::{
    DbError,
    store::{IncidentStore, PgIncidentStore},
};
use vision_zero_feed::{FeedError, IncidentFeed, arcgis::ArcGisFeed};
use vision_zero_incident_models::Incident;

use crate::config::SyncConfig;
use crate::high_water_mark::resolve_high_water_mark;
use crate::upsert::apply_upserts;

/// Errors that abort a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A store query failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// The upstream fetch failed.
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The store has no records and no initial high-water mark is set.
    #[error(
        "Store has no incidents to derive a high-water mark from; \
         set HIGH_WATER_MARK or INITIAL_HIGH_WATER_MARK"
    )]
    EmptyStore,
}

/// Per-run settings for [`sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Mark used verbatim instead of querying the store.
    pub high_water_mark: Option<String>,
    /// Mark used when the store is empty.
    pub initial_high_water_mark: Option<String>,
    /// Maximum writes in flight.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            high_water_mark: None,
            initial_high_water_mark: None,
            concurrency: config::DEFAULT_CONCURRENCY,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            high_water_mark: config.high_water_mark.clone(),
            initial_high_water_mark: config.initial_high_water_mark.clone(),
            concurrency: config.concurrency,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Inclusive lower bound used for the fetch.
    pub high_water_mark: String,
    /// Unique records fetched.
    pub fetched: usize,
    /// Fetched records already present in the store.
    pub existing: usize,
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Writes that failed.
    pub failed: usize,
}

/// Runs one synchronization pass of `feed` into `store`.
///
/// # Errors
///
/// * [`SyncError::EmptyStore`] if no mark can be resolved
/// * [`SyncError::Database`] if the mark or existence lookup fails
/// * [`SyncError::Feed`] if the fetch fails
///
/// Individual write failures are logged and counted in
/// [`SyncReport::failed`] instead.
pub async fn sync(
    store: &dyn IncidentStore,
    feed: &dyn IncidentFeed,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let start = Instant::now();

    let high_water_mark = resolve_high_water_mark(
        store,
        options.high_water_mark.as_deref(),
        options.initial_high_water_mark.as_deref(),
    )
    .await?;

    let fetched = feed.fetch_since(&high_water_mark).await?;
    let incidents = dedupe_by_incident_id(fetched);
    log::info!(
        "{}: {} records fetched from remote",
        feed.label(),
        incidents.len()
    );

    if incidents.is_empty() {
        log::info!("{}: nothing to sync", feed.label());
        return Ok(SyncReport {
            high_water_mark,
            ..SyncReport::default()
        });
    }

    let ids: Vec<&str> = incidents.iter().map(|i| i.incident_id.as_str()).collect();
    let existing = store.existing_incident_ids(&ids).await?;
    log::info!(
        "{}: {} existing records found in store",
        feed.label(),
        existing.len()
    );

    let summary = apply_upserts(store, &incidents, &existing, options.concurrency).await;

    log::info!(
        "{}: sync complete in {:.1}s: {} inserted, {} updated, {} failed",
        feed.label(),
        start.elapsed().as_secs_f64(),
        summary.inserted,
        summary.updated,
        summary.failed,
    );

    Ok(SyncReport {
        high_water_mark,
        fetched: incidents.len(),
        existing: existing.len(),
        inserted: summary.inserted,
        updated: summary.updated,
        failed: summary.failed,
    })
}

/// Connects to the configured store and feed and runs one pass.
///
/// # Errors
///
/// Returns [`SyncError`] if connecting fails or [`sync`] fails.
pub async fn run(config: &SyncConfig) -> Result<SyncReport, SyncError> {
    log::info!("Connecting to {}", config.database.redacted());
    let store = PgIncidentStore::connect(config.database.credentials()?).await?;

    let client = reqwest::Client::builder()
        .user_agent("vision-zero-sync/1.0")
        .build()?;
    let feed = ArcGisFeed::new(client, config.feed_url.clone(), "Denver");

    let result = sync(&store, &feed, &SyncOptions::from(config)).await;
    store.close();
    result
}

/// Drops repeated `incident_id`s, keeping the last occurrence in its
/// original position.
fn dedupe_by_incident_id(incidents: Vec<Incident>) -> Vec<Incident> {
    let mut last_index = BTreeMap::new();
    for (index, incident) in incidents.iter().enumerate() {
        last_index.insert(incident.incident_id.clone(), index);
    }

    let before = incidents.len();
    let deduped: Vec<Incident> = incidents
        .into_iter()
        .enumerate()
        .filter(|(index, incident)| last_index.get(&incident.incident_id) == Some(index))
        .map(|(_, incident)| incident)
        .collect();

    if deduped.len() < before {
        log::warn!(
            "Dropped {} duplicate incident ids from fetched batch",
            before - deduped.len()
        );
    }
    deduped
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone as _, Utc};
    use vision_zero_incident_models::arcgis::IncidentAttributes;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Write {
        Insert,
        Update,
    }

    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<BTreeMap<String, Incident>>,
        writes: Mutex<Vec<(String, Write)>>,
        existence_queries: AtomicUsize,
        fail_ids: BTreeSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeStore {
        fn with_rows(rows: Vec<Incident>) -> Self {
            Self {
                rows: Mutex::new(
                    rows.into_iter()
                        .map(|i| (i.incident_id.clone(), i))
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn writes(&self) -> Vec<(String, Write)> {
            self.writes.lock().unwrap().clone()
        }

        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        async fn write(&self, incident: &Incident, kind: Write) -> Result<u64, DbError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_ids.contains(&incident.incident_id) {
                return Err(DbError::Conversion {
                    message: format!("rejected {}", incident.incident_id),
                });
            }

            self.writes
                .lock()
                .unwrap()
                .push((incident.incident_id.clone(), kind));
            let mut rows = self.rows.lock().unwrap();
            match kind {
                Write::Insert => {
                    rows.insert(incident.incident_id.clone(), incident.clone());
                    Ok(1)
                }
                Write::Update => Ok(rows
                    .insert(incident.incident_id.clone(), incident.clone())
                    .map_or(0, |_| 1)),
            }
        }
    }

    #[async_trait]
    impl IncidentStore for FakeStore {
        async fn max_first_occurrence_date(&self) -> Result<Option<DateTime<Utc>>, DbError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter_map(|i| i.first_occurrence_date)
                .max())
        }

        async fn existing_incident_ids(
            &self,
            ids: &[&str],
        ) -> Result<BTreeSet<String>, DbError> {
            self.existence_queries.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().unwrap();
            Ok(ids
                .iter()
                .filter(|id| rows.contains_key(**id))
                .map(|id| (*id).to_string())
                .collect())
        }

        async fn insert(&self, incident: &Incident) -> Result<u64, DbError> {
            self.write(incident, Write::Insert).await
        }

        async fn update(&self, incident: &Incident) -> Result<u64, DbError> {
            self.write(incident, Write::Update).await
        }
    }

    struct FakeFeed {
        records: Vec<Incident>,
        requested: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeFeed {
        fn new(records: Vec<Incident>) -> Self {
            Self {
                records,
                requested: Mutex::new(vec![]),
                fail: false,
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IncidentFeed for FakeFeed {
        fn label(&self) -> &str {
            "Test"
        }

        async fn fetch_since(&self, high_water_mark: &str) -> Result<Vec<Incident>, FeedError> {
            self.requested
                .lock()
                .unwrap()
                .push(high_water_mark.to_string());
            if self.fail {
                return Err(FeedError::Service {
                    code: Some(400),
                    message: "Invalid query parameters".to_string(),
                });
            }
            Ok(self.records.clone())
        }
    }

    fn incident(id: &str, occurred: DateTime<Utc>) -> Incident {
        #[allow(clippy::cast_precision_loss)]
        let millis = occurred.timestamp_millis() as f64;
        Incident::from_attributes(IncidentAttributes {
            incident_id: Some(id.to_string()),
            first_occurrence_date: Some(millis),
            ..IncidentAttributes::default()
        })
        .unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
    }

    fn with_override(mark: &str) -> SyncOptions {
        SyncOptions {
            high_water_mark: Some(mark.to_string()),
            ..SyncOptions::default()
        }
    }

    #[tokio::test]
    async fn uses_override_verbatim() {
        let store = FakeStore::with_rows(vec![incident("1", day(20))]);
        let feed = FakeFeed::new(vec![]);

        let report = sync(&store, &feed, &with_override("2024-01-01")).await.unwrap();

        assert_eq!(report.high_water_mark, "2024-01-01");
        assert_eq!(feed.requested(), vec!["2024-01-01".to_string()]);
    }

    #[tokio::test]
    async fn derives_mark_one_day_before_latest() {
        let store = FakeStore::with_rows(vec![
            incident("1", day(2)),
            incident("2", Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()),
        ]);
        let feed = FakeFeed::new(vec![]);

        let report = sync(&store, &feed, &SyncOptions::default()).await.unwrap();

        assert_eq!(report.high_water_mark, "2024-03-09");
        assert_eq!(feed.requested(), vec!["2024-03-09".to_string()]);
    }

    #[tokio::test]
    async fn empty_store_without_initial_mark_is_fatal() {
        let store = FakeStore::default();
        let feed = FakeFeed::new(vec![incident("1", day(1))]);

        let result = sync(&store, &feed, &SyncOptions::default()).await;

        assert!(matches!(result, Err(SyncError::EmptyStore)));
        assert!(feed.requested().is_empty());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn empty_store_uses_initial_mark() {
        let store = FakeStore::default();
        let feed = FakeFeed::new(vec![incident("1", day(1))]);
        let options = SyncOptions {
            initial_high_water_mark: Some("2019-01-01".to_string()),
            ..SyncOptions::default()
        };

        let report = sync(&store, &feed, &options).await.unwrap();

        assert_eq!(report.high_water_mark, "2019-01-01");
        assert_eq!(report.inserted, 1);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn empty_fetch_skips_existence_query_and_writes() {
        let store = FakeStore::with_rows(vec![incident("1", day(5))]);
        let feed = FakeFeed::new(vec![]);

        let report = sync(&store, &feed, &SyncOptions::default()).await.unwrap();

        assert_eq!(report.fetched, 0);
        assert_eq!(store.existence_queries.load(Ordering::SeqCst), 0);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn updates_known_and_inserts_new() {
        let store = FakeStore::with_rows(vec![incident("A", day(4)), incident("B", day(5))]);
        let mut changed = incident("B", day(5));
        changed.fatalities = Some(1);
        let feed = FakeFeed::new(vec![changed.clone(), incident("C", day(6))]);

        let report = sync(&store, &feed, &with_override("2024-03-04")).await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.existing, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed, 0);

        let mut writes = store.writes();
        writes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            writes,
            vec![
                ("B".to_string(), Write::Update),
                ("C".to_string(), Write::Insert),
            ]
        );
        assert_eq!(store.rows.lock().unwrap().get("B"), Some(&changed));
        assert_eq!(store.row_count(), 3);
    }

    #[tokio::test]
    async fn rerun_against_same_feed_is_idempotent() {
        let store = FakeStore::with_rows(vec![incident("A", day(4))]);
        let feed = FakeFeed::new(vec![incident("A", day(4)), incident("B", day(5))]);

        let first = sync(&store, &feed, &SyncOptions::default()).await.unwrap();
        assert_eq!((first.inserted, first.updated), (1, 1));

        let second = sync(&store, &feed, &SyncOptions::default()).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 2));
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn isolates_individual_write_failures() {
        let store = FakeStore {
            fail_ids: BTreeSet::from(["bad".to_string()]),
            ..FakeStore::default()
        };
        let feed = FakeFeed::new(vec![
            incident("ok-1", day(1)),
            incident("bad", day(2)),
            incident("ok-2", day(3)),
        ]);

        let report = sync(&store, &feed, &with_override("2024-03-01")).await.unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let store = FakeStore::default();
        let records = (0..40).map(|n| incident(&n.to_string(), day(1))).collect();
        let feed = FakeFeed::new(records);
        let options = SyncOptions {
            high_water_mark: Some("2024-03-01".to_string()),
            concurrency: 4,
            ..SyncOptions::default()
        };

        let report = sync(&store, &feed, &options).await.unwrap();

        assert_eq!(report.inserted, 40);
        let peak = store.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak in-flight writes was {peak}");
        assert!(peak > 1, "writes were never concurrent");
    }

    #[tokio::test]
    async fn duplicate_ids_in_batch_are_written_once() {
        let store = FakeStore::default();
        let mut later = incident("dup", day(2));
        later.fatalities = Some(2);
        let feed = FakeFeed::new(vec![
            incident("dup", day(1)),
            incident("x", day(1)),
            later.clone(),
        ]);

        let report = sync(&store, &feed, &with_override("2024-03-01")).await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(store.rows.lock().unwrap().get("dup"), Some(&later));
    }

    #[tokio::test]
    async fn feed_error_aborts_before_writes() {
        let store = FakeStore::with_rows(vec![incident("A", day(4))]);
        let feed = FakeFeed {
            fail: true,
            ..FakeFeed::new(vec![])
        };

        let result = sync(&store, &feed, &SyncOptions::default()).await;

        assert!(matches!(result, Err(SyncError::Feed(_))));
        assert_eq!(store.existence_queries.load(Ordering::SeqCst), 0);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn dedupe_keeps_last_occurrence_in_place() {
        let deduped = dedupe_by_incident_id(vec![
            incident("a", day(1)),
            incident("b", day(1)),
            incident("a", day(2)),
        ]);
        let ids: Vec<&str> = deduped.iter().map(|i| i.incident_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(deduped[1].first_occurrence_date, Some(day(2)));
    }
}
