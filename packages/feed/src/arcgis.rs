//! `ArcGIS` REST feature-query fetcher.
//!
//! Issues a single filtered, ordered query against a `FeatureServer` layer.
//! There is no pagination loop: if the layer's `maxRecordCount` is lower
//! than the number of matching records, the service sets
//! `exceededTransferLimit` and the surplus is not returned. That case is
//! logged as a warning so a growing backlog is visible.

use async_trait::async_trait;
use vision_zero_incident_models::Incident;
use vision_zero_incident_models::arcgis::FeatureQueryResponse;

use crate::{FeedError, IncidentFeed};

/// Denver "Traffic Accidents (5 years)" layer query endpoint.
pub const DENVER_TRAFFIC_ACCIDENTS_URL: &str = "https://services1.arcgis.com/zdB7qR0BtYrg0Xpl/arcgis/rest/services/ODC_CRIME_TRAFFICACCIDENTS5YR_P/FeatureServer/325/query";

/// Attribute the high-water mark filters and orders on.
pub const DATE_FIELD: &str = "first_occurrence_date";

/// Builds the `where` expression for records on or after `high_water_mark`.
#[must_use]
pub fn where_clause(high_water_mark: &str) -> String {
    format!("{DATE_FIELD}>='{high_water_mark}'")
}

/// Returns the full query-string parameter list for a fetch starting at
/// `high_water_mark`, in the order the feature-query contract documents
/// them. Empty values are sent as empty parameters.
#[must_use]
pub fn query_params(high_water_mark: &str) -> Vec<(&'static str, String)> {
    let fixed = |v: &str| v.to_string();
    vec![
        ("where", where_clause(high_water_mark)),
        ("objectIds", fixed("")),
        ("geometry", fixed("")),
        ("geometryType", fixed("esriGeometryEnvelope")),
        ("inSR", fixed("")),
        ("spatialRel", fixed("esriSpatialRelIntersects")),
        ("resultType", fixed("none")),
        ("distance", fixed("0.0")),
        ("units", fixed("esriSRUnit_Meter")),
        ("relationParam", fixed("")),
        ("returnGeodetic", fixed("false")),
        ("outFields", fixed("*")),
        ("returnGeometry", fixed("true")),
        ("featureEncoding", fixed("esriDefault")),
        ("multipatchOption", fixed("xyFootprint")),
        ("maxAllowableOffset", fixed("")),
        ("geometryPrecision", fixed("")),
        ("outSR", fixed("")),
        ("defaultSR", fixed("")),
        ("datumTransformation", fixed("")),
        ("applyVCSProjection", fixed("false")),
        ("returnIdsOnly", fixed("false")),
        ("returnUniqueIdsOnly", fixed("false")),
        ("returnCountOnly", fixed("false")),
        ("returnExtentOnly", fixed("false")),
        ("returnQueryGeometry", fixed("false")),
        ("returnDistinctValues", fixed("false")),
        ("cacheHint", fixed("false")),
        ("collation", fixed("")),
        ("orderByFields", format!("{DATE_FIELD} asc")),
        ("groupByFieldsForStatistics", fixed("")),
        ("outStatistics", fixed("")),
        ("having", fixed("")),
        ("resultOffset", fixed("")),
        ("resultRecordCount", fixed("")),
        ("returnZ", fixed("false")),
        ("returnM", fixed("false")),
        ("returnTrueCurves", fixed("false")),
        ("returnExceededLimitFeatures", fixed("true")),
        ("quantizationParameters", fixed("")),
        ("sqlFormat", fixed("none")),
        ("f", fixed("pjson")),
        ("token", fixed("")),
    ]
}

/// Converts a decoded response into normalized incidents.
///
/// # Errors
///
/// Returns [`FeedError::Service`] if the response is an error envelope.
pub fn into_incidents(
    response: FeatureQueryResponse,
    label: &str,
) -> Result<Vec<Incident>, FeedError> {
    if let Some(error) = response.error {
        let mut message = error
            .message
            .unwrap_or_else(|| "unknown service error".to_string());
        if let Some(details) = error.details.filter(|d| !d.is_empty()) {
            message = format!("{message} ({})", details.join("; "));
        }
        return Err(FeedError::Service {
            code: error.code,
            message,
        });
    }

    if response.exceeded_transfer_limit {
        log::warn!(
            "{label}: service reported exceededTransferLimit; records beyond the \
             server page cap were not returned"
        );
    }

    let raw_count = response.features.len();
    let incidents: Vec<Incident> = response
        .features
        .into_iter()
        .filter_map(|feature| {
            let object_id = feature.attributes.object_id;
            let incident = Incident::from_attributes(feature.attributes);
            if incident.is_none() {
                log::warn!(
                    "{label}: skipping feature without incident_id (object_id={object_id:?})"
                );
            }
            incident
        })
        .collect();

    if incidents.len() < raw_count {
        log::info!("{label}: kept {} of {raw_count} features", incidents.len());
    }

    Ok(incidents)
}

/// Production [`IncidentFeed`] backed by an `ArcGIS` feature-query endpoint.
pub struct ArcGisFeed {
    client: reqwest::Client,
    query_url: String,
    label: String,
}

impl ArcGisFeed {
    /// Creates a feed for an arbitrary layer query URL.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        query_url: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            client,
            query_url: query_url.into(),
            label: label.into(),
        }
    }

    /// Creates a feed for the Denver traffic-accident layer.
    #[must_use]
    pub fn denver(client: reqwest::Client) -> Self {
        Self::new(client, DENVER_TRAFFIC_ACCIDENTS_URL, "Denver")
    }

    /// Returns the query endpoint this feed requests.
    #[must_use]
    pub fn query_url(&self) -> &str {
        &self.query_url
    }

    /// Builds the GET request for a fetch starting at `high_water_mark`.
    #[must_use]
    pub fn request(&self, high_water_mark: &str) -> reqwest::RequestBuilder {
        self.client
            .get(&self.query_url)
            .query(&query_params(high_water_mark))
    }
}

#[async_trait]
impl IncidentFeed for ArcGisFeed {
    fn label(&self) -> &str {
        &self.label
    }

    async fn fetch_since(&self, high_water_mark: &str) -> Result<Vec<Incident>, FeedError> {
        log::info!(
            "{}: fetching {} with {}",
            self.label,
            self.query_url(),
            where_clause(high_water_mark)
        );

        let response = self
            .request(high_water_mark)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        let body: FeatureQueryResponse = serde_json::from_str(&text)?;

        into_incidents(body, &self.label)
    }
}
