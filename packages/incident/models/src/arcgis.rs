//! Upstream `ArcGIS` feature-query response types.
//!
//! The Denver traffic-accident layer mixes lowercase and uppercase
//! attribute keys (`incident_id` next to `HARMFUL_EVENT_SEQ_1`, and both
//! `point_x` and `POINT_X` depending on the layer revision). This module is
//! the only place that knows about that: [`normalize_keys`] lowercases every
//! attribute key before [`IncidentAttributes`] is decoded, so everything
//! downstream uses the lowercase column names.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Body of a `FeatureServer/<layer>/query` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureQueryResponse {
    /// Returned features. Missing when the service answers with an error.
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Set by the service when more records matched than it returned.
    #[serde(default)]
    pub exceeded_transfer_limit: bool,
    /// Error envelope (`{"error": {"code": 400, "message": ...}}`).
    #[serde(default)]
    pub error: Option<ServiceError>,
}

/// Error envelope returned by `ArcGIS` REST services with an HTTP 200.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceError {
    /// Service error code (usually mirrors an HTTP status).
    #[serde(default)]
    pub code: Option<i64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Additional detail lines. Some services send `null`.
    #[serde(default)]
    pub details: Option<Vec<String>>,
}

/// A single feature: an attribute bag plus optional point geometry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Feature {
    /// Flat attribute bag, decoded after key normalization.
    #[serde(deserialize_with = "normalized_attributes")]
    pub attributes: IncidentAttributes,
    /// Point geometry in the layer's spatial reference.
    #[serde(default)]
    pub geometry: Option<PointGeometry>,
}

/// Point geometry of a feature.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PointGeometry {
    /// X coordinate.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: Option<f64>,
    /// Y coordinate.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: Option<f64>,
}

/// Raw upstream attributes of a traffic incident.
///
/// Field names are the lowercase destination column names. All fields are
/// optional. Text fields also accept JSON numbers and numeric fields also
/// accept numeric strings, since the layer has changed field types between
/// revisions. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentAttributes {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub object_id: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub incident_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub offense_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub offense_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub offense_code_extension: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub top_traffic_accident_offense: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub first_occurrence_date: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub last_occurrence_date: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub reported_date: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub incident_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub geo_x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub geo_y: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub geo_lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub geo_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub district_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub precinct_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub neighborhood_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub bicycle_ind: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub pedestrian_ind: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub harmful_event_seq_1: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub harmful_event_seq_2: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub harmful_event_seq_3: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub road_location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub road_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub road_contour: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub road_condition: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub light_condition: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu1_vehicle_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu1_travel_direction: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu1_vehicle_movement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu1_driver_action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu1_driver_humancontribfactor: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu1_pedestrian_action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu2_vehicle_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu2_travel_direction: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu2_vehicle_movement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu2_driver_action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu2_driver_humancontribfactor: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tu2_pedestrian_action: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub seriously_injured: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fatalities: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fatality_mode_1: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fatality_mode_2: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub seriously_injured_mode_1: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub seriously_injured_mode_2: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub point_x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub point_y: Option<f64>,
}

/// Lowercases attribute keys.
///
/// When two keys collapse onto the same name (`point_x` and `POINT_X`), a
/// non-null value under the already-lowercase key wins. Otherwise the first
/// non-null value in key order is kept (`serde_json::Map` iterates keys
/// sorted, so `POINT_X` is seen before `Point_X`).
#[must_use]
pub fn normalize_keys(attributes: Map<String, Value>) -> Map<String, Value> {
    let mut normalized = Map::with_capacity(attributes.len());
    let mut other_case = Vec::new();

    for (key, value) in attributes {
        let lower = key.to_ascii_lowercase();
        if lower == key {
            normalized.insert(key, value);
        } else {
            other_case.push((lower, value));
        }
    }

    for (key, value) in other_case {
        let keep_existing = normalized
            .get(&key)
            .is_some_and(|existing| !existing.is_null());
        if !keep_existing {
            normalized.insert(key, value);
        }
    }

    normalized
}

fn normalized_attributes<'de, D>(deserializer: D) -> Result<IncidentAttributes, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Map::<String, Value>::deserialize(deserializer)?;
    IncidentAttributes::deserialize(Value::Object(normalize_keys(raw)))
        .map_err(serde::de::Error::custom)
}

/// Accepts a string, number, or boolean. Null and other shapes become `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        },
    )
}

/// Accepts a number or a numeric string. Anything else becomes `None`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        },
    )
}
