// src/routes/doctor_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{require_text, ApiOk, AppState, OkData},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DoctorRow {
    pub doctor_id: Uuid,
    pub name: String,
    pub specialty: String,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors).post(create_doctor))
        .route(
            "/doctors/{doctor_id}",
            get(get_doctor).patch(update_doctor).delete(delete_doctor),
        )
}

async fn load_doctor(state: &AppState, doctor_id: Uuid) -> Result<DoctorRow, ApiError> {
    sqlx::query_as::<_, DoctorRow>(
        r#"
        SELECT doctor_id, name, specialty, available, created_at, updated_at
        FROM doctor
        WHERE doctor_id = $1
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("doctor"))
}

#[derive(Debug, Deserialize)]
pub struct DoctorQuery {
    pub available: Option<bool>,
}

pub async fn list_doctors(
    State(state): State<AppState>,
    Query(q): Query<DoctorQuery>,
) -> Result<Json<ApiOk<Vec<DoctorRow>>>, ApiError> {
    let rows: Vec<DoctorRow> = sqlx::query_as::<_, DoctorRow>(
        r#"
        SELECT doctor_id, name, specialty, available, created_at, updated_at
        FROM doctor
        WHERE ($1::bool IS NULL OR available = $1)
        ORDER BY name ASC
        "#,
    )
    .bind(q.available)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    Ok(Json(ApiOk { data: load_doctor(&state, doctor_id).await? }))
}

#[derive(Debug, Deserialize)]
pub struct CreateDoctorRequest {
    pub name: String,
    pub specialty: String,
    pub available: Option<bool>,
}

pub async fn create_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateDoctorRequest>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    auth.ensure_clinic()?;

    let name = require_text(&req.name, "name")?;
    let specialty = require_text(&req.specialty, "specialty")?;

    let row: DoctorRow = sqlx::query_as::<_, DoctorRow>(
        r#"
        INSERT INTO doctor (name, specialty, available)
        VALUES ($1, $2, $3)
        RETURNING doctor_id, name, specialty, available, created_at, updated_at
        "#,
    )
    .bind(&name)
    .bind(&specialty)
    .bind(req.available.unwrap_or(true))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::DoctorCreated,
        json!({ "doctor_id": row.doctor_id, "name": name, "specialty": specialty }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDoctorRequest {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub available: Option<bool>,
}

pub async fn update_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(doctor_id): Path<Uuid>,
    Json(req): Json<UpdateDoctorRequest>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    auth.ensure_clinic()?;

    let name = req.name.as_deref().map(|n| require_text(n, "name")).transpose()?;
    let specialty = req
        .specialty
        .as_deref()
        .map(|s| require_text(s, "specialty"))
        .transpose()?;

    let row: DoctorRow = sqlx::query_as::<_, DoctorRow>(
        r#"
        UPDATE doctor
        SET name = COALESCE($1, name),
            specialty = COALESCE($2, specialty),
            available = COALESCE($3, available),
            updated_at = now()
        WHERE doctor_id = $4
        RETURNING doctor_id, name, specialty, available, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(specialty)
    .bind(req.available)
    .bind(doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db_write)?
    .ok_or_else(|| ApiError::not_found("doctor"))?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::DoctorUpdated,
        json!({ "doctor_id": doctor_id, "name": row.name, "available": row.available }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;

    let doctor = load_doctor(&state, doctor_id).await?;

    let active: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM appointment
        WHERE doctor_id = $1
          AND status NOT IN (2, 3)
        "#,
    )
    .bind(doctor_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if active > 0 {
        return Err(ApiError::BadRequest(
            "HAS_ACTIVE_APPOINTMENTS",
            format!("Doctor has {active} active appointment(s)"),
        ));
    }

    sqlx::query("DELETE FROM doctor WHERE doctor_id = $1")
        .bind(doctor_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::DoctorDeleted,
        json!({ "doctor_id": doctor_id, "name": doctor.name }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}
