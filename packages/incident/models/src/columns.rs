//! Destination table layout.
//!
//! [`INCIDENT_COLUMNS`] is the one ordered list of persisted fields. The
//! insert column list, the update `SET` list, and the bound parameter list
//! are all generated from it, so they cannot drift apart.

use strum_macros::{Display, EnumString};

/// Schema-qualified destination table.
pub const INCIDENTS_TABLE: &str = "vision_zero.incidents_denver";

/// Natural key column.
pub const KEY_COLUMN: &str = "incident_id";

/// SQL type of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    /// `bigint`
    Bigint,
    /// `varchar`
    Varchar,
    /// `char`
    Char,
    /// `timestamp` (without time zone, stored as UTC)
    Timestamp,
    /// `integer`
    Integer,
    /// `numeric`
    Numeric,
    /// `smallint`
    Smallint,
}

impl ColumnType {
    /// Type a bound parameter is cast to before assignment.
    ///
    /// The Postgres driver binds `i64`, `i32`, `f64`, text, and timestamps
    /// only as their exact wire types, so narrower and `numeric` columns
    /// receive an explicit cast and rely on the assignment cast from there.
    #[must_use]
    pub const fn bind_cast(self) -> &'static str {
        match self {
            Self::Bigint | Self::Integer => "bigint",
            Self::Smallint => "integer",
            Self::Numeric => "float8",
            Self::Timestamp => "timestamp",
            Self::Varchar | Self::Char => "text",
        }
    }
}

/// A destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name (also the normalized upstream attribute name).
    pub name: &'static str,
    /// SQL type.
    pub sql_type: ColumnType,
}

const fn col(name: &'static str, sql_type: ColumnType) -> Column {
    Column { name, sql_type }
}

/// Number of persisted incident fields.
pub const INCIDENT_COLUMN_COUNT: usize = 47;

/// Every persisted column, in binding order.
pub const INCIDENT_COLUMNS: [Column; INCIDENT_COLUMN_COUNT] = [
    col("object_id", ColumnType::Bigint),
    col("incident_id", ColumnType::Varchar),
    col("offense_id", ColumnType::Varchar),
    col("offense_code", ColumnType::Varchar),
    col("offense_code_extension", ColumnType::Char),
    col("top_traffic_accident_offense", ColumnType::Varchar),
    col("first_occurrence_date", ColumnType::Timestamp),
    col("last_occurrence_date", ColumnType::Timestamp),
    col("reported_date", ColumnType::Timestamp),
    col("incident_address", ColumnType::Varchar),
    col("geo_x", ColumnType::Integer),
    col("geo_y", ColumnType::Integer),
    col("geo_lon", ColumnType::Numeric),
    col("geo_lat", ColumnType::Numeric),
    col("district_id", ColumnType::Varchar),
    col("precinct_id", ColumnType::Varchar),
    col("neighborhood_id", ColumnType::Varchar),
    col("bicycle_ind", ColumnType::Smallint),
    col("pedestrian_ind", ColumnType::Smallint),
    col("harmful_event_seq_1", ColumnType::Varchar),
    col("harmful_event_seq_2", ColumnType::Varchar),
    col("harmful_event_seq_3", ColumnType::Varchar),
    col("road_location", ColumnType::Varchar),
    col("road_description", ColumnType::Varchar),
    col("road_contour", ColumnType::Varchar),
    col("road_condition", ColumnType::Varchar),
    col("light_condition", ColumnType::Varchar),
    col("tu1_vehicle_type", ColumnType::Varchar),
    col("tu1_travel_direction", ColumnType::Varchar),
    col("tu1_vehicle_movement", ColumnType::Varchar),
    col("tu1_driver_action", ColumnType::Varchar),
    col("tu1_driver_humancontribfactor", ColumnType::Varchar),
    col("tu1_pedestrian_action", ColumnType::Varchar),
    col("tu2_vehicle_type", ColumnType::Varchar),
    col("tu2_travel_direction", ColumnType::Varchar),
    col("tu2_vehicle_movement", ColumnType::Varchar),
    col("tu2_driver_action", ColumnType::Varchar),
    col("tu2_driver_humancontribfactor", ColumnType::Varchar),
    col("tu2_pedestrian_action", ColumnType::Varchar),
    col("seriously_injured", ColumnType::Smallint),
    col("fatalities", ColumnType::Smallint),
    col("fatality_mode_1", ColumnType::Varchar),
    col("fatality_mode_2", ColumnType::Varchar),
    col("seriously_injured_mode_1", ColumnType::Varchar),
    col("seriously_injured_mode_2", ColumnType::Varchar),
    col("point_x", ColumnType::Numeric),
    col("point_y", ColumnType::Numeric),
];

/// Returns the 1-based parameter position of `name` in
/// [`INCIDENT_COLUMNS`].
#[must_use]
pub fn param_position(name: &str) -> Option<usize> {
    INCIDENT_COLUMNS
        .iter()
        .position(|c| c.name == name)
        .map(|i| i + 1)
}
