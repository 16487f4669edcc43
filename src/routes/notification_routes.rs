// src/routes/notification_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    appointment_flow::fmt_time,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{require_text, ApiOk, AppState, OkData},
    notify::{self, NotificationKind, NotificationRow},
};

const LIST_LIMIT: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications).post(create_notification))
        .route("/notifications/read_all", post(mark_all_read))
        .route("/notifications/read", delete(delete_read))
        .route("/notifications/reminders", post(send_reminders))
        .route("/notifications/{notification_id}", delete(delete_notification))
        .route("/notifications/{notification_id}/read", post(mark_read))
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub unread: Option<bool>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<NotificationQuery>,
) -> Result<Json<ApiOk<Vec<NotificationRow>>>, ApiError> {
    let rows: Vec<NotificationRow> = sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT notification_id, user_id, kind, title, message, is_read, created_at
        FROM notification
        WHERE user_id = $1
          AND ($2::bool IS NOT TRUE OR is_read = false)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(auth.user_id)
    .bind(q.unread)
    .bind(LIST_LIMIT)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

pub async fn create_notification(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<Json<ApiOk<NotificationRow>>, ApiError> {
    auth.ensure_clinic()?;

    let title = require_text(&req.title, "title")?;
    let message = require_text(&req.message, "message")?;

    let row = notify::insert(&state.db, req.user_id, req.kind, &title, &message)
        .await
        .map_err(ApiError::db_write)?;

    Ok(Json(ApiOk { data: row }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE notification_id = $1 AND user_id = $2
        "#,
    )
    .bind(notification_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("notification"));
    }
    Ok(Json(ApiOk::ok()))
}

#[derive(Debug, Serialize)]
pub struct CountData {
    pub count: u64,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<CountData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE user_id = $1 AND is_read = false
        "#,
    )
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: CountData { count: res.rows_affected() } }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let owner: Uuid = sqlx::query_scalar("SELECT user_id FROM notification WHERE notification_id = $1")
        .bind(notification_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("notification"))?;

    if owner != auth.user_id && !auth.is_admin() {
        return Err(ApiError::forbidden("You can only delete your own notifications"));
    }

    sqlx::query("DELETE FROM notification WHERE notification_id = $1")
        .bind(notification_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk::ok()))
}

pub async fn delete_read(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<CountData>>, ApiError> {
    let res = sqlx::query("DELETE FROM notification WHERE user_id = $1 AND is_read = true")
        .bind(auth.user_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: CountData { count: res.rows_affected() } }))
}

/* ============================================================
   Reminder job
   ============================================================ */

/// With no key configured the job endpoint is open.
pub fn check_job_key(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("INVALID_API_KEY", "Missing or invalid x-api-key".into()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReminderRow {
    user_id: Uuid,
    doctor_name: String,
    service_name: String,
    appointment_time: NaiveTime,
}

pub fn reminder_message(doctor_name: &str, service_name: &str, date: NaiveDate, time: NaiveTime) -> String {
    format!(
        "Reminder: your {} appointment with {} is tomorrow ({}) at {}.",
        service_name,
        doctor_name,
        date.format("%Y-%m-%d"),
        fmt_time(time)
    )
}

#[derive(Debug, Serialize)]
pub struct RemindersData {
    pub sent: u64,
}

pub async fn send_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiOk<RemindersData>>, ApiError> {
    check_job_key(state.cron_api_key.as_deref(), &headers)?;

    let tomorrow = state.today() + Duration::days(1);

    let rows: Vec<ReminderRow> = sqlx::query_as::<_, ReminderRow>(
        r#"
        SELECT p.user_id, d.name AS doctor_name, s.name AS service_name, a.appointment_time
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        JOIN doctor d ON d.doctor_id = a.doctor_id
        JOIN service s ON s.service_id = a.service_id
        WHERE a.appointment_date = $1
          AND a.status = 1
          AND p.user_id IS NOT NULL
        ORDER BY a.appointment_time ASC
        "#,
    )
    .bind(tomorrow)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let mut sent = 0u64;
    for r in &rows {
        let message = reminder_message(&r.doctor_name, &r.service_name, tomorrow, r.appointment_time);
        match notify::insert(
            &state.db,
            r.user_id,
            NotificationKind::AppointmentReminder,
            "Appointment reminder",
            &message,
        )
        .await
        {
            Ok(_) => sent += 1,
            Err(e) => tracing::warn!(user_id = %r.user_id, error = %e, "failed to send reminder"),
        }
    }

    tracing::info!(date = %tomorrow, candidates = rows.len(), sent, "reminder job finished");
    Ok(Json(ApiOk { data: RemindersData { sent } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_check_job_key() {
        let mut headers = HeaderMap::new();
        assert!(check_job_key(None, &headers).is_ok());
        assert!(check_job_key(Some("s3cret"), &headers).is_err());

        headers.insert("x-api-key", HeaderValue::from_static("wrong"));
        assert!(check_job_key(Some("s3cret"), &headers).is_err());

        headers.insert("x-api-key", HeaderValue::from_static("s3cret"));
        assert!(check_job_key(Some("s3cret"), &headers).is_ok());
    }

    #[test]
    fn test_reminder_message() {
        let msg = reminder_message(
            "Dr. Reyes",
            "Cleaning",
            NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(),
            NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
        );
        assert_eq!(
            msg,
            "Reminder: your Cleaning appointment with Dr. Reyes is tomorrow (2025-05-02) at 14:30."
        );
    }
}
