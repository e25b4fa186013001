//! Concurrent insert-or-update of a fetched batch.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt as _};
use vision_zero_database::store::IncidentStore;
use vision_zero_incident_models::{Incident, to_iso8601};

/// What happened to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was inserted.
    Inserted,
    /// An existing row was overwritten.
    Updated,
    /// The write failed and was logged.
    Failed,
}

/// Per-outcome totals for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Writes that failed.
    pub failed: usize,
}

impl UpsertSummary {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Failed => self.failed += 1,
        }
    }
}

/// Writes one record, updating when its id is in `existing` and inserting
/// otherwise.
///
/// Errors are logged together with the record and reported as
/// [`UpsertOutcome::Failed`]; they never abort the batch.
pub async fn upsert_one(
    store: &dyn IncidentStore,
    incident: &Incident,
    existing: &BTreeSet<String>,
) -> UpsertOutcome {
    if existing.contains(&incident.incident_id) {
        match store.update(incident).await {
            Ok(0) => {
                log::warn!(
                    "Update of incident {} matched no rows",
                    incident.incident_id
                );
                UpsertOutcome::Updated
            }
            Ok(_) => UpsertOutcome::Updated,
            Err(e) => {
                log::error!("Error updating {}: {e}", describe(incident));
                log::error!("Record: {incident:?}");
                UpsertOutcome::Failed
            }
        }
    } else {
        match store.insert(incident).await {
            Ok(_) => UpsertOutcome::Inserted,
            Err(e) => {
                log::error!("Error inserting {}: {e}", describe(incident));
                log::error!("Record: {incident:?}");
                UpsertOutcome::Failed
            }
        }
    }
}

/// Identifies a record in log lines.
fn describe(incident: &Incident) -> String {
    incident.first_occurrence_date.as_ref().map_or_else(
        || format!("incident {}", incident.incident_id),
        |occurred| {
            format!(
                "incident {} (first occurred {})",
                incident.incident_id,
                to_iso8601(occurred)
            )
        },
    )
}

/// Upserts every record with at most `concurrency` writes in flight.
///
/// Returns once every write has completed.
pub async fn apply_upserts(
    store: &dyn IncidentStore,
    incidents: &[Incident],
    existing: &BTreeSet<String>,
    concurrency: usize,
) -> UpsertSummary {
    let concurrency = concurrency.max(1);

    log::debug!(
        "Writing {} records (concurrency={concurrency})",
        incidents.len()
    );

    let outcomes: Vec<UpsertOutcome> = stream::iter(
        incidents
            .iter()
            .map(|incident| upsert_one(store, incident, existing)),
    )
    .buffer_unordered(concurrency)
    .collect()
    .await;

    let mut summary = UpsertSummary::default();
    for outcome in outcomes {
        summary.record(outcome);
    }
    summary
}
