//! Store abstraction used by the synchronizer.
//!
//! [`IncidentStore`] is the seam between the sync algorithm and Postgres.
//! [`PgIncidentStore`] forwards each operation to [`crate::queries`] over a
//! single shared connection.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use switchy_database::Database;
use vision_zero_incident_models::Incident;

use crate::db::Credentials;
use crate::{DbError, queries};

/// Destination for synchronized incidents.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Returns the latest stored `first_occurrence_date`, or `None` when
    /// nothing is stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the lookup fails.
    async fn max_first_occurrence_date(&self) -> Result<Option<DateTime<Utc>>, DbError>;

    /// Returns which of `ids` are already stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the lookup fails.
    async fn existing_incident_ids(&self, ids: &[&str]) -> Result<BTreeSet<String>, DbError>;

    /// Inserts a new row for `incident`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    async fn insert(&self, incident: &Incident) -> Result<u64, DbError>;

    /// Overwrites the row keyed by `incident.incident_id`, returning the
    /// number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails.
    async fn update(&self, incident: &Incident) -> Result<u64, DbError>;
}

/// [`IncidentStore`] backed by a `switchy_database` Postgres connection.
pub struct PgIncidentStore {
    db: Box<dyn Database>,
}

impl PgIncidentStore {
    /// Wraps an open connection.
    #[must_use]
    pub const fn new(db: Box<dyn Database>) -> Self {
        Self { db }
    }

    /// Connects with `creds` and wraps the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails.
    pub async fn connect(creds: Credentials) -> Result<Self, DbError> {
        Ok(Self::new(crate::db::connect(creds).await?))
    }

    /// Releases the connection.
    pub fn close(self) {
        drop(self.db);
        log::debug!("Database connection closed");
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn max_first_occurrence_date(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        queries::get_max_first_occurrence_date(self.db.as_ref()).await
    }

    async fn existing_incident_ids(&self, ids: &[&str]) -> Result<BTreeSet<String>, DbError> {
        queries::get_existing_incident_ids(self.db.as_ref(), ids).await
    }

    async fn insert(&self, incident: &Incident) -> Result<u64, DbError> {
        queries::insert_incident(self.db.as_ref(), incident).await
    }

    async fn update(&self, incident: &Incident) -> Result<u64, DbError> {
        queries::update_incident(self.db.as_ref(), incident).await
    }
}
