#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Upstream incident feed.
//!
//! The [`IncidentFeed`] trait decouples the synchronizer from where records
//! come from. [`arcgis::ArcGisFeed`] is the production implementation that
//! queries the Denver traffic-accident `FeatureServer` layer.

pub mod arcgis;

use async_trait::async_trait;
use vision_zero_incident_models::Incident;

/// Errors that can occur while fetching the upstream feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// HTTP request failed (connection, status, or body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not a valid feature-query response.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The service answered with an error envelope.
    #[error("Feature service error {code:?}: {message}")]
    Service {
        /// Service error code, when given.
        code: Option<i64>,
        /// Error message and details.
        message: String,
    },
}

/// A source of traffic incident records.
#[async_trait]
pub trait IncidentFeed: Send + Sync {
    /// Returns a label for log messages (e.g., `"Denver"`).
    fn label(&self) -> &str;

    /// Fetches every record whose `first_occurrence_date` is on or after
    /// `high_water_mark` (`YYYY-MM-DD`), ordered by that date ascending.
    ///
    /// Records without an `incident_id` are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the request fails or the body cannot be
    /// decoded.
    async fn fetch_since(&self, high_water_mark: &str) -> Result<Vec<Incident>, FeedError>;
}
