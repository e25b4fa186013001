//! Queries against the incidents table.
//!
//! SQL text is generated from [`INCIDENT_COLUMNS`], and values are produced
//! by [`incident_values`] in the same order. The insert and update
//! statements bind the identical parameter list, so a record is stored the
//! same way whichever path it takes.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use vision_zero_incident_models::Incident;
use vision_zero_incident_models::columns::{
    Column, INCIDENT_COLUMNS, INCIDENTS_TABLE, KEY_COLUMN, param_position,
};

use crate::DbError;

/// Maximum number of ids bound in one existence query. Postgres allows at
/// most 65,535 parameters per statement.
pub const EXISTENCE_CHUNK_SIZE: usize = 10_000;

fn placeholder(position: usize, column: &Column) -> String {
    format!("${position}::{}", column.sql_type.bind_cast())
}

/// Builds the `INSERT` statement for all persisted columns.
#[must_use]
pub fn insert_sql() -> String {
    let columns = INCIDENT_COLUMNS
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ");
    let values = INCIDENT_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| placeholder(i + 1, c))
        .collect::<Vec<_>>()
        .join(", ");

    format!("INSERT INTO {INCIDENTS_TABLE} ({columns}) VALUES ({values})")
}

/// Builds the `UPDATE` statement that overwrites every column except the
/// natural key, matched on `incident_id`.
///
/// Uses the same parameter positions as [`insert_sql`].
#[must_use]
pub fn update_sql() -> String {
    let assignments = INCIDENT_COLUMNS
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name != KEY_COLUMN)
        .map(|(i, c)| format!("{} = {}", c.name, placeholder(i + 1, c)))
        .collect::<Vec<_>>()
        .join(", ");
    let key_position = param_position(KEY_COLUMN).unwrap_or(2);

    format!(
        "UPDATE {INCIDENTS_TABLE} SET {assignments} WHERE {KEY_COLUMN} = ${key_position}::text"
    )
}

/// Builds the existence query for `count` ids.
#[must_use]
pub fn existing_ids_sql(count: usize) -> String {
    let placeholders = (1..=count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!("SELECT {KEY_COLUMN} FROM {INCIDENTS_TABLE} WHERE {KEY_COLUMN} IN ({placeholders})")
}

fn text(value: Option<&String>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone()))
}

fn big_int(value: Option<i64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Int64)
}

fn small_int(value: Option<i32>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Int32)
}

fn real(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

fn timestamp(value: Option<&DateTime<Utc>>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |dt| DatabaseValue::DateTime(dt.naive_utc()))
}

/// Returns the bound values for `incident`, ordered as [`INCIDENT_COLUMNS`].
#[must_use]
pub fn incident_values(incident: &Incident) -> Vec<DatabaseValue> {
    let tu1 = &incident.tu1;
    let tu2 = &incident.tu2;

    vec![
        big_int(incident.object_id),
        DatabaseValue::String(incident.incident_id.clone()),
        text(incident.offense_id.as_ref()),
        text(incident.offense_code.as_ref()),
        text(incident.offense_code_extension.as_ref()),
        text(incident.top_traffic_accident_offense.as_ref()),
        timestamp(incident.first_occurrence_date.as_ref()),
        timestamp(incident.last_occurrence_date.as_ref()),
        timestamp(incident.reported_date.as_ref()),
        text(incident.incident_address.as_ref()),
        big_int(incident.geo_x),
        big_int(incident.geo_y),
        real(incident.geo_lon),
        real(incident.geo_lat),
        text(incident.district_id.as_ref()),
        DatabaseValue::String(incident.precinct_id.clone()),
        DatabaseValue::String(incident.neighborhood_id.clone()),
        small_int(incident.bicycle_ind),
        small_int(incident.pedestrian_ind),
        text(incident.harmful_event_seq_1.as_ref()),
        text(incident.harmful_event_seq_2.as_ref()),
        text(incident.harmful_event_seq_3.as_ref()),
        text(incident.road_location.as_ref()),
        text(incident.road_description.as_ref()),
        text(incident.road_contour.as_ref()),
        text(incident.road_condition.as_ref()),
        text(incident.light_condition.as_ref()),
        text(tu1.vehicle_type.as_ref()),
        text(tu1.travel_direction.as_ref()),
        text(tu1.vehicle_movement.as_ref()),
        text(tu1.driver_action.as_ref()),
        text(tu1.driver_humancontribfactor.as_ref()),
        text(tu1.pedestrian_action.as_ref()),
        text(tu2.vehicle_type.as_ref()),
        text(tu2.travel_direction.as_ref()),
        text(tu2.vehicle_movement.as_ref()),
        text(tu2.driver_action.as_ref()),
        text(tu2.driver_humancontribfactor.as_ref()),
        text(tu2.pedestrian_action.as_ref()),
        small_int(incident.seriously_injured),
        small_int(incident.fatalities),
        text(incident.fatality_mode_1.as_ref()),
        text(incident.fatality_mode_2.as_ref()),
        text(incident.seriously_injured_mode_1.as_ref()),
        text(incident.seriously_injured_mode_2.as_ref()),
        real(incident.point_x),
        real(incident.point_y),
    ]
}

/// Returns the latest stored `first_occurrence_date`, or `None` if the
/// table is empty.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_max_first_occurrence_date(
    db: &dyn Database,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT MAX(first_occurrence_date) AS max_first_occurrence_date FROM {INCIDENTS_TABLE}"
            ),
            &[],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    let naive: Option<NaiveDateTime> = row
        .to_value("max_first_occurrence_date")
        .map_err(|e| DbError::Conversion {
            message: format!("Failed to parse max first_occurrence_date: {e}"),
        })?;

    Ok(naive.map(|n| DateTime::<Utc>::from_naive_utc_and_offset(n, Utc)))
}

/// Returns the subset of `ids` already present in the table.
///
/// Duplicate ids are collapsed before querying; large inputs are split into
/// chunks of [`EXISTENCE_CHUNK_SIZE`].
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_existing_incident_ids(
    db: &dyn Database,
    ids: &[&str],
) -> Result<BTreeSet<String>, DbError> {
    let unique: Vec<&str> = ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut existing = BTreeSet::new();

    for chunk in unique.chunks(EXISTENCE_CHUNK_SIZE) {
        let params: Vec<DatabaseValue> = chunk
            .iter()
            .map(|id| DatabaseValue::String((*id).to_string()))
            .collect();

        let rows = db
            .query_raw_params(&existing_ids_sql(chunk.len()), &params)
            .await?;

        for row in &rows {
            let id: String = row.to_value(KEY_COLUMN).map_err(|e| DbError::Conversion {
                message: format!("Failed to parse incident_id: {e}"),
            })?;
            existing.insert(id);
        }
    }

    Ok(existing)
}

/// Inserts a new incident row.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails (e.g., a constraint violation).
pub async fn insert_incident(db: &dyn Database, incident: &Incident) -> Result<u64, DbError> {
    Ok(db
        .exec_raw_params(&insert_sql(), &incident_values(incident))
        .await?)
}

/// Overwrites every column of the row keyed by `incident.incident_id`.
/// Returns the number of rows affected.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn update_incident(db: &dyn Database, incident: &Incident) -> Result<u64, DbError> {
    Ok(db
        .exec_raw_params(&update_sql(), &incident_values(incident))
        .await?)
}
