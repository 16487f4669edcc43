// src/routes/schedule_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{ApiOk, AppState, OkData},
    scheduling::{DayOfWeek, TimeBlock},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ScheduleRow {
    pub schedule_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

const SCHEDULE_SELECT: &str = r#"
    SELECT ds.schedule_id, ds.doctor_id, d.name AS doctor_name, ds.day_of_week,
           ds.start_time, ds.end_time
    FROM doctor_schedule ds
    JOIN doctor d ON d.doctor_id = ds.doctor_id
"#;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/schedules/{schedule_id}",
            get(get_schedule).patch(update_schedule).delete(delete_schedule),
        )
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub doctor_id: Option<Uuid>,
    /// Weekday name, e.g. `Monday`.
    pub day: Option<String>,
}

fn parse_day(raw: &str) -> Result<DayOfWeek, ApiError> {
    DayOfWeek::parse(raw).ok_or_else(|| ApiError::validation(format!("unknown weekday: {raw}")))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Query(q): Query<ScheduleQuery>,
) -> Result<Json<ApiOk<Vec<ScheduleRow>>>, ApiError> {
    let day = q.day.as_deref().map(parse_day).transpose()?;

    let rows: Vec<ScheduleRow> = sqlx::query_as::<_, ScheduleRow>(&format!(
        r#"
        {SCHEDULE_SELECT}
        WHERE ($1::uuid IS NULL OR ds.doctor_id = $1)
          AND ($2::smallint IS NULL OR ds.day_of_week = $2)
        ORDER BY ds.day_of_week ASC, ds.start_time ASC, d.name ASC
        "#
    ))
    .bind(q.doctor_id)
    .bind(day)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

async fn load_schedule(state: &AppState, schedule_id: Uuid) -> Result<ScheduleRow, ApiError> {
    sqlx::query_as::<_, ScheduleRow>(&format!("{SCHEDULE_SELECT} WHERE ds.schedule_id = $1"))
        .bind(schedule_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("schedule"))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    Ok(Json(ApiOk { data: load_schedule(&state, schedule_id).await? }))
}

/// Blocks must be ordered and must not overlap another block of the same
/// doctor on the same weekday.
pub fn validate_block(candidate: TimeBlock, others: &[TimeBlock]) -> Result<(), ApiError> {
    if candidate.end <= candidate.start {
        return Err(ApiError::validation("end_time must be after start_time"));
    }
    if others.iter().any(|o| o.overlaps(&candidate)) {
        return Err(ApiError::Conflict(
            "SCHEDULE_OVERLAP",
            "This block overlaps an existing schedule for the doctor on that day".into(),
        ));
    }
    Ok(())
}

async fn sibling_blocks(
    state: &AppState,
    doctor_id: Uuid,
    day: DayOfWeek,
    exclude: Option<Uuid>,
) -> Result<Vec<TimeBlock>, ApiError> {
    let rows: Vec<(NaiveTime, NaiveTime)> = sqlx::query_as(
        r#"
        SELECT start_time, end_time
        FROM doctor_schedule
        WHERE doctor_id = $1
          AND day_of_week = $2
          AND ($3::uuid IS NULL OR schedule_id <> $3)
        "#,
    )
    .bind(doctor_id)
    .bind(day)
    .bind(exclude)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(rows.into_iter().map(|(start, end)| TimeBlock { start, end }).collect())
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub doctor_id: Uuid,
    pub day: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    auth.ensure_clinic()?;

    let day = parse_day(&req.day)?;
    let block = TimeBlock { start: req.start_time, end: req.end_time };
    let others = sibling_blocks(&state, req.doctor_id, day, None).await?;
    validate_block(block, &others)?;

    let schedule_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO doctor_schedule (doctor_id, day_of_week, start_time, end_time)
        VALUES ($1, $2, $3, $4)
        RETURNING schedule_id
        "#,
    )
    .bind(req.doctor_id)
    .bind(day)
    .bind(req.start_time)
    .bind(req.end_time)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    let row = load_schedule(&state, schedule_id).await?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ScheduleCreated,
        json!({
            "schedule_id": schedule_id,
            "doctor": row.doctor_name,
            "day": day.as_str(),
            "start_time": row.start_time.format("%H:%M").to_string(),
            "end_time": row.end_time.format("%H:%M").to_string(),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub day: Option<String>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

pub async fn update_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    auth.ensure_clinic()?;

    let existing = load_schedule(&state, schedule_id).await?;
    let day = match req.day.as_deref() {
        Some(d) => parse_day(d)?,
        None => existing.day_of_week,
    };
    let block = TimeBlock {
        start: req.start_time.unwrap_or(existing.start_time),
        end: req.end_time.unwrap_or(existing.end_time),
    };
    let others = sibling_blocks(&state, existing.doctor_id, day, Some(schedule_id)).await?;
    validate_block(block, &others)?;

    sqlx::query(
        r#"
        UPDATE doctor_schedule
        SET day_of_week = $1, start_time = $2, end_time = $3, updated_at = now()
        WHERE schedule_id = $4
        "#,
    )
    .bind(day)
    .bind(block.start)
    .bind(block.end)
    .bind(schedule_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    let row = load_schedule(&state, schedule_id).await?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ScheduleUpdated,
        json!({
            "schedule_id": schedule_id,
            "doctor": row.doctor_name,
            "day": day.as_str(),
            "start_time": block.start.format("%H:%M").to_string(),
            "end_time": block.end.format("%H:%M").to_string(),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_clinic()?;

    let existing = load_schedule(&state, schedule_id).await?;

    sqlx::query("DELETE FROM doctor_schedule WHERE schedule_id = $1")
        .bind(schedule_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ScheduleDeleted,
        json!({
            "schedule_id": schedule_id,
            "doctor": existing.doctor_name,
            "day": existing.day_of_week.as_str(),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_validate_block() {
        let morning = TimeBlock { start: t(9, 0), end: t(12, 0) };
        assert!(validate_block(TimeBlock { start: t(13, 0), end: t(17, 0) }, &[morning]).is_ok());
        // touching ends is fine
        assert!(validate_block(TimeBlock { start: t(12, 0), end: t(14, 0) }, &[morning]).is_ok());
        assert!(matches!(
            validate_block(TimeBlock { start: t(11, 0), end: t(14, 0) }, &[morning]),
            Err(ApiError::Conflict("SCHEDULE_OVERLAP", _))
        ));
        assert!(matches!(
            validate_block(TimeBlock { start: t(15, 0), end: t(15, 0) }, &[]),
            Err(ApiError::BadRequest("VALIDATION_ERROR", _))
        ));
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("friday").unwrap(), DayOfWeek::Friday);
        assert!(parse_day("Funday").is_err());
    }
}
