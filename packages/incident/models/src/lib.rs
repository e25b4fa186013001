#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Traffic incident record types.
//!
//! [`arcgis`] holds the upstream wire shape, [`columns`] the destination
//! table layout, and [`Incident`] the normalized record that flows between
//! them.

pub mod arcgis;
pub mod columns;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::arcgis::IncidentAttributes;

/// A traffic incident normalized for storage.
///
/// Field names match the destination columns. Timestamps are converted from
/// epoch milliseconds; `precinct_id` and `neighborhood_id` default to the
/// empty string when absent upstream. Everything else that is absent stays
/// `None` and is stored as SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub object_id: Option<i64>,
    /// Natural key.
    pub incident_id: String,
    pub offense_id: Option<String>,
    pub offense_code: Option<String>,
    pub offense_code_extension: Option<String>,
    pub top_traffic_accident_offense: Option<String>,
    pub first_occurrence_date: Option<DateTime<Utc>>,
    pub last_occurrence_date: Option<DateTime<Utc>>,
    pub reported_date: Option<DateTime<Utc>>,
    pub incident_address: Option<String>,
    /// Projected (state plane) x coordinate.
    pub geo_x: Option<i64>,
    /// Projected (state plane) y coordinate.
    pub geo_y: Option<i64>,
    pub geo_lon: Option<f64>,
    pub geo_lat: Option<f64>,
    pub district_id: Option<String>,
    pub precinct_id: String,
    pub neighborhood_id: String,
    pub bicycle_ind: Option<i32>,
    pub pedestrian_ind: Option<i32>,
    pub harmful_event_seq_1: Option<String>,
    pub harmful_event_seq_2: Option<String>,
    pub harmful_event_seq_3: Option<String>,
    pub road_location: Option<String>,
    pub road_description: Option<String>,
    pub road_contour: Option<String>,
    pub road_condition: Option<String>,
    pub light_condition: Option<String>,
    pub tu1: TrafficUnit,
    pub tu2: TrafficUnit,
    pub seriously_injured: Option<i32>,
    pub fatalities: Option<i32>,
    pub fatality_mode_1: Option<String>,
    pub fatality_mode_2: Option<String>,
    pub seriously_injured_mode_1: Option<String>,
    pub seriously_injured_mode_2: Option<String>,
    pub point_x: Option<f64>,
    pub point_y: Option<f64>,
}

/// Descriptors of one party (vehicle, cyclist, or pedestrian) involved in an
/// incident. Stored as the `tu1_*` / `tu2_*` column groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficUnit {
    /// Vehicle type code.
    pub vehicle_type: Option<String>,
    /// Direction of travel.
    pub travel_direction: Option<String>,
    /// Vehicle movement code.
    pub vehicle_movement: Option<String>,
    /// Driver action code.
    pub driver_action: Option<String>,
    /// Driver human contributing factor.
    pub driver_humancontribfactor: Option<String>,
    /// Pedestrian action code.
    pub pedestrian_action: Option<String>,
}

impl Incident {
    /// Normalizes raw upstream attributes.
    ///
    /// Returns `None` when the record has no usable `incident_id`, since it
    /// could never be matched against the store.
    #[must_use]
    pub fn from_attributes(attrs: IncidentAttributes) -> Option<Self> {
        let incident_id = attrs.incident_id.filter(|id| !id.trim().is_empty())?;

        Some(Self {
            object_id: whole_number(attrs.object_id),
            incident_id,
            offense_id: attrs.offense_id,
            offense_code: attrs.offense_code,
            offense_code_extension: attrs.offense_code_extension,
            top_traffic_accident_offense: attrs.top_traffic_accident_offense,
            first_occurrence_date: attrs.first_occurrence_date.and_then(epoch_millis_to_utc),
            last_occurrence_date: attrs.last_occurrence_date.and_then(epoch_millis_to_utc),
            reported_date: attrs.reported_date.and_then(epoch_millis_to_utc),
            incident_address: attrs.incident_address,
            geo_x: whole_number(attrs.geo_x),
            geo_y: whole_number(attrs.geo_y),
            geo_lon: attrs.geo_lon,
            geo_lat: attrs.geo_lat,
            district_id: attrs.district_id,
            precinct_id: attrs.precinct_id.unwrap_or_default(),
            neighborhood_id: attrs.neighborhood_id.unwrap_or_default(),
            bicycle_ind: small_number(attrs.bicycle_ind),
            pedestrian_ind: small_number(attrs.pedestrian_ind),
            harmful_event_seq_1: attrs.harmful_event_seq_1,
            harmful_event_seq_2: attrs.harmful_event_seq_2,
            harmful_event_seq_3: attrs.harmful_event_seq_3,
            road_location: attrs.road_location,
            road_description: attrs.road_description,
            road_contour: attrs.road_contour,
            road_condition: attrs.road_condition,
            light_condition: attrs.light_condition,
            tu1: TrafficUnit {
                vehicle_type: attrs.tu1_vehicle_type,
                travel_direction: attrs.tu1_travel_direction,
                vehicle_movement: attrs.tu1_vehicle_movement,
                driver_action: attrs.tu1_driver_action,
                driver_humancontribfactor: attrs.tu1_driver_humancontribfactor,
                pedestrian_action: attrs.tu1_pedestrian_action,
            },
            tu2: TrafficUnit {
                vehicle_type: attrs.tu2_vehicle_type,
                travel_direction: attrs.tu2_travel_direction,
                vehicle_movement: attrs.tu2_vehicle_movement,
                driver_action: attrs.tu2_driver_action,
                driver_humancontribfactor: attrs.tu2_driver_humancontribfactor,
                pedestrian_action: attrs.tu2_pedestrian_action,
            },
            seriously_injured: small_number(attrs.seriously_injured),
            fatalities: small_number(attrs.fatalities),
            fatality_mode_1: attrs.fatality_mode_1,
            fatality_mode_2: attrs.fatality_mode_2,
            seriously_injured_mode_1: attrs.seriously_injured_mode_1,
            seriously_injured_mode_2: attrs.seriously_injured_mode_2,
            point_x: attrs.point_x.filter(|v| v.is_finite()),
            point_y: attrs.point_y.filter(|v| v.is_finite()),
        })
    }
}

/// Converts an epoch-millisecond timestamp to a UTC date-time.
///
/// Returns `None` for non-finite or out-of-range values.
#[must_use]
pub fn epoch_millis_to_utc(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let millis = ms.round() as i64;
    DateTime::from_timestamp_millis(millis)
}

/// Formats a timestamp as ISO-8601 with millisecond precision and a `Z`
/// suffix (e.g. `2023-11-14T22:13:20.000Z`).
#[must_use]
pub fn to_iso8601(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[allow(clippy::cast_possible_truncation)]
fn whole_number(value: Option<f64>) -> Option<i64> {
    value.filter(|v| v.is_finite()).map(|v| v.round() as i64)
}

#[allow(clippy::cast_possible_truncation)]
fn small_number(value: Option<f64>) -> Option<i32> {
    value.filter(|v| v.is_finite()).map(|v| v.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes(value: serde_json::Value) -> IncidentAttributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn converts_epoch_millis_to_iso8601() {
        let dt = epoch_millis_to_utc(1_700_000_000_000.0).unwrap();
        assert_eq!(to_iso8601(&dt), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn keeps_millisecond_precision() {
        let dt = epoch_millis_to_utc(1_705_312_200_123.0).unwrap();
        assert_eq!(to_iso8601(&dt), "2024-01-15T09:50:00.123Z");
    }

    #[test]
    fn rejects_non_finite_millis() {
        assert!(epoch_millis_to_utc(f64::NAN).is_none());
        assert!(epoch_millis_to_utc(f64::INFINITY).is_none());
    }

    #[test]
    fn skips_records_without_incident_id() {
        assert!(Incident::from_attributes(attributes(serde_json::json!({}))).is_none());
        assert!(
            Incident::from_attributes(attributes(serde_json::json!({"incident_id": "  "})))
                .is_none()
        );
    }

    #[test]
    fn normalizes_full_record() {
        let incident = Incident::from_attributes(attributes(serde_json::json!({
            "object_id": 17,
            "incident_id": "2023601234",
            "offense_id": "202360123454410",
            "offense_code": "5441",
            "offense_code_extension": "0",
            "top_traffic_accident_offense": "TRAF - ACCIDENT",
            "first_occurrence_date": 1_700_000_000_000_i64,
            "last_occurrence_date": null,
            "reported_date": 1_700_000_600_000_i64,
            "incident_address": "E COLFAX AVE / N YORK ST",
            "geo_x": 3_152_010.0,
            "geo_y": 1_694_920.0,
            "geo_lon": -104.9594,
            "geo_lat": 39.7402,
            "district_id": "2",
            "bicycle_ind": 0,
            "pedestrian_ind": 1,
            "tu1_vehicle_type": "PASSENGER CAR",
            "tu2_pedestrian_action": "CROSSING",
            "seriously_injured": 1,
            "fatalities": 0
        })))
        .unwrap();

        assert_eq!(incident.object_id, Some(17));
        assert_eq!(incident.geo_x, Some(3_152_010));
        assert_eq!(incident.pedestrian_ind, Some(1));
        assert_eq!(
            incident.first_occurrence_date.map(|d| to_iso8601(&d)).as_deref(),
            Some("2023-11-14T22:13:20.000Z")
        );
        assert!(incident.last_occurrence_date.is_none());
        assert_eq!(incident.tu1.vehicle_type.as_deref(), Some("PASSENGER CAR"));
        assert_eq!(incident.tu2.pedestrian_action.as_deref(), Some("CROSSING"));
    }

    #[test]
    fn absent_points_stay_none() {
        let incident = Incident::from_attributes(attributes(serde_json::json!({
            "incident_id": "A",
            "point_x": null
        })))
        .unwrap();
        assert!(incident.point_x.is_none());
        assert!(incident.point_y.is_none());
    }

    #[test]
    fn absent_precinct_and_neighborhood_default_to_empty() {
        let incident =
            Incident::from_attributes(attributes(serde_json::json!({"incident_id": "A"}))).unwrap();
        assert_eq!(incident.precinct_id, "");
        assert_eq!(incident.neighborhood_id, "");
        assert!(incident.district_id.is_none());
    }

    #[test]
    fn text_with_quotes_is_kept_verbatim() {
        let incident = Incident::from_attributes(attributes(serde_json::json!({
            "incident_id": "A",
            "incident_address": "O'BRIEN'S WAY",
            "road_location": "AT INTERSECTION 'A'"
        })))
        .unwrap();
        assert_eq!(incident.incident_address.as_deref(), Some("O'BRIEN'S WAY"));
        assert_eq!(incident.road_location.as_deref(), Some("AT INTERSECTION 'A'"));
    }
}
