// src/routes/audit_routes.rs

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction, AuditLogRow},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{clean_opt, ApiOk, AppState, OkData, Role},
    notify::{self, NotificationKind},
};

pub const DEFAULT_LIMIT: i64 = 1000;
pub const MAX_LIMIT: i64 = 5000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit_logs", get(list_logs).post(create_log).delete(clear_logs))
        .route("/audit_logs/export", get(export_logs))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub action: Option<String>,
    pub user_id: Option<Uuid>,
    /// Matches user name, action or details text.
    pub search: Option<String>,
    pub limit: Option<i64>,
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

async fn query_logs(state: &AppState, q: &AuditQuery) -> Result<Vec<AuditLogRow>, ApiError> {
    let action = clean_opt(q.action.as_deref()).map(|a| a.to_uppercase());
    let search = clean_opt(q.search.as_deref()).map(|s| format!("%{s}%"));

    // Date filters are clinic-local calendar days.
    sqlx::query_as::<_, AuditLogRow>(
        r#"
        SELECT audit_log_id, action, details, user_id, user_name, user_role, ip_address, created_at
        FROM audit_log
        WHERE ($1::date IS NULL OR (created_at + make_interval(mins => $7))::date >= $1)
          AND ($2::date IS NULL OR (created_at + make_interval(mins => $7))::date <= $2)
          AND ($3::text IS NULL OR action = $3)
          AND ($4::uuid IS NULL OR user_id = $4)
          AND ($5::text IS NULL OR user_name ILIKE $5 OR action ILIKE $5 OR details::text ILIKE $5)
        ORDER BY created_at DESC
        LIMIT $6
        "#,
    )
    .bind(q.start_date)
    .bind(q.end_date)
    .bind(action)
    .bind(q.user_id)
    .bind(search)
    .bind(clamp_limit(q.limit))
    .bind(state.clinic_utc_offset_minutes)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn list_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<AuditQuery>,
) -> Result<Json<ApiOk<Vec<AuditLogRow>>>, ApiError> {
    auth.ensure_admin()?;
    Ok(Json(ApiOk { data: query_logs(&state, &q).await? }))
}

#[derive(Debug, Deserialize)]
pub struct CreateLogRequest {
    pub action: AuditAction,
    #[serde(default)]
    pub details: JsonValue,
}

/// Lets the front end record events that never reach an API write.
pub async fn create_log(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateLogRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_clinic()?;

    let details = match req.details {
        JsonValue::Null => json!({}),
        other => other,
    };
    audit::record(&state.db, &Actor::from(&auth), req.action, details, &ip).await;

    Ok(Json(ApiOk::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    pub all: Option<bool>,
    pub older_than: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ClearedData {
    pub deleted: u64,
}

pub async fn clear_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Query(q): Query<ClearQuery>,
) -> Result<Json<ApiOk<ClearedData>>, ApiError> {
    auth.ensure_admin()?;

    let res = match (q.all.unwrap_or(false), q.older_than) {
        (true, _) => sqlx::query("DELETE FROM audit_log").execute(&state.db).await,
        (false, Some(cutoff)) => {
            sqlx::query(
                r#"
                DELETE FROM audit_log
                WHERE (created_at + make_interval(mins => $2))::date < $1
                "#,
            )
            .bind(cutoff)
            .bind(state.clinic_utc_offset_minutes)
            .execute(&state.db)
            .await
        }
        (false, None) => {
            return Err(ApiError::validation("pass all=true or older_than=YYYY-MM-DD"));
        }
    };
    let deleted = res.map_err(ApiError::db)?.rows_affected();

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::AuditLogsCleared,
        json!({
            "deleted": deleted,
            "older_than": q.older_than,
            "all": q.all.unwrap_or(false),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: ClearedData { deleted } }))
}

pub async fn export_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Query(q): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    auth.ensure_admin()?;

    let rows = query_logs(&state, &q).await?;
    let csv = audit::to_csv(&rows);
    let filename = format!("audit_logs_{}.csv", state.today().format("%Y-%m-%d"));

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::DataExport,
        json!({ "export": "audit_logs", "rows": rows.len() }),
        &ip,
    )
    .await;

    notify::to_role(
        &state.db,
        Role::Admin,
        NotificationKind::Info,
        "Audit logs exported",
        &format!("{} exported {} audit log entries.", auth.full_name, rows.len()),
    )
    .await;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        csv,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 1000);
        assert_eq!(clamp_limit(Some(20)), 20);
        assert_eq!(clamp_limit(Some(100_000)), 5000);
        assert_eq!(clamp_limit(Some(0)), 1);
    }

    #[test]
    fn test_manual_entry_body() {
        let req: CreateLogRequest = serde_json::from_str(r#"{"action":"DATA_EXPORT"}"#).unwrap();
        assert_eq!(req.action, AuditAction::DataExport);
        assert_eq!(req.details, JsonValue::Null);
        assert!(serde_json::from_str::<CreateLogRequest>(r#"{"action":"NOPE"}"#).is_err());
    }
}
