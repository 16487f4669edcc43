// src/routes/clinic_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::json;

use crate::{
    audit::{self, Actor, AuditAction},
    booking,
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{deserialize_double_option, load_clinic_name, ApiOk, AppState, ClinicProfile},
    scheduling::{self, ClinicDay, DayOfWeek},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/clinic", get(get_clinic).patch(update_clinic))
        .route("/clinic_schedule", get(get_week))
        .route("/clinic_schedule/{day}", get(get_day).put(put_day))
}

/* ============================================================
   Clinic settings
   ============================================================ */

pub async fn get_clinic(State(state): State<AppState>) -> Result<Json<ApiOk<ClinicProfile>>, ApiError> {
    let clinic_name = load_clinic_name(&state.db).await?;
    Ok(Json(ApiOk { data: ClinicProfile { clinic_name } }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    pub clinic_name: String,
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ApiOk<ClinicProfile>>, ApiError> {
    auth.ensure_admin()?;

    let name = req.clinic_name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("clinic_name is required"));
    }
    if name.chars().count() > 128 {
        return Err(ApiError::validation("clinic_name is too long (max 128)"));
    }

    let clinic_name: String = sqlx::query_scalar(
        r#"
        INSERT INTO clinic_settings (singleton_id, clinic_name)
        VALUES (TRUE, $1)
        ON CONFLICT (singleton_id)
        DO UPDATE SET clinic_name = EXCLUDED.clinic_name
        RETURNING clinic_name
        "#,
    )
    .bind(name)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ClinicSettingsUpdated,
        json!({ "clinic_name": clinic_name }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: ClinicProfile { clinic_name } }))
}

/* ============================================================
   Clinic hours
   ============================================================ */

fn parse_day(raw: &str) -> Result<DayOfWeek, ApiError> {
    DayOfWeek::parse(raw).ok_or_else(|| ApiError::validation(format!("unknown weekday: {raw}")))
}

pub async fn get_week(State(state): State<AppState>) -> Result<Json<ApiOk<Vec<ClinicDay>>>, ApiError> {
    let stored: Vec<ClinicDay> = sqlx::query_as::<_, ClinicDay>(
        r#"
        SELECT day_of_week, is_open, start_time, end_time, break_start_time, break_end_time
        FROM clinic_schedule
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: scheduling::full_week(stored) }))
}

pub async fn get_day(
    State(state): State<AppState>,
    Path(day): Path<String>,
) -> Result<Json<ApiOk<ClinicDay>>, ApiError> {
    let day = parse_day(&day)?;
    Ok(Json(ApiOk { data: booking::load_clinic_day(&state.db, day).await? }))
}

#[derive(Debug, Deserialize)]
pub struct PutDayRequest {
    pub is_open: Option<bool>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub break_start_time: Option<Option<NaiveTime>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub break_end_time: Option<Option<NaiveTime>>,
}

impl PutDayRequest {
    fn apply(self, current: ClinicDay) -> ClinicDay {
        ClinicDay {
            day_of_week: current.day_of_week,
            is_open: self.is_open.unwrap_or(current.is_open),
            start_time: self.start_time.unwrap_or(current.start_time),
            end_time: self.end_time.unwrap_or(current.end_time),
            break_start_time: self.break_start_time.unwrap_or(current.break_start_time),
            break_end_time: self.break_end_time.unwrap_or(current.break_end_time),
        }
    }
}

pub async fn put_day(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(day): Path<String>,
    Json(req): Json<PutDayRequest>,
) -> Result<Json<ApiOk<ClinicDay>>, ApiError> {
    auth.ensure_clinic()?;

    let day = parse_day(&day)?;
    let current = booking::load_clinic_day(&state.db, day).await?;
    let next = req.apply(current);
    next.validate()?;

    let saved: ClinicDay = sqlx::query_as::<_, ClinicDay>(
        r#"
        INSERT INTO clinic_schedule
            (day_of_week, is_open, start_time, end_time, break_start_time, break_end_time, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        ON CONFLICT (day_of_week) DO UPDATE
        SET is_open = EXCLUDED.is_open,
            start_time = EXCLUDED.start_time,
            end_time = EXCLUDED.end_time,
            break_start_time = EXCLUDED.break_start_time,
            break_end_time = EXCLUDED.break_end_time,
            updated_at = now()
        RETURNING day_of_week, is_open, start_time, end_time, break_start_time, break_end_time
        "#,
    )
    .bind(day)
    .bind(next.is_open)
    .bind(next.start_time)
    .bind(next.end_time)
    .bind(next.break_start_time)
    .bind(next.break_end_time)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    let fmt = |t: Option<NaiveTime>| t.map(|t| t.format("%H:%M").to_string());
    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ClinicHoursUpdated,
        json!({
            "day": day.as_str(),
            "is_open": saved.is_open,
            "start_time": fmt(Some(saved.start_time)),
            "end_time": fmt(Some(saved.end_time)),
            "break_start_time": fmt(saved.break_start_time),
            "break_end_time": fmt(saved.break_end_time),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: saved }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_day_merges_and_clears_break() {
        let current = ClinicDay::default_for(DayOfWeek::Monday);
        let req: PutDayRequest = serde_json::from_str(
            r#"{"end_time":"17:00:00","break_start_time":null,"break_end_time":null}"#,
        )
        .unwrap();
        let next = req.apply(current);
        assert!(next.is_open);
        assert_eq!(next.end_time, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert_eq!(next.break_window(), None);
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_put_day_rejects_break_outside_hours() {
        let current = ClinicDay::default_for(DayOfWeek::Tuesday);
        let req: PutDayRequest =
            serde_json::from_str(r#"{"start_time":"12:30:00"}"#).unwrap();
        assert!(req.apply(current).validate().is_err());
    }
}
