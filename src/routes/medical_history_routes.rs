// src/routes/medical_history_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::{
    appointment_flow::{fmt_date, fmt_time},
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{clean_opt, deserialize_double_option, require_text, ApiOk, AppState, OkData},
    notify::{self, NotificationKind},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MedicalHistoryRow {
    pub record_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub service_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub record_date: NaiveDate,
    pub record_time: NaiveTime,
    pub treatment: String,
    pub remarks: Option<String>,
    pub images: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const HISTORY_SELECT: &str = r#"
    SELECT mh.record_id, mh.patient_id, p.full_name AS patient_name,
           mh.service_id, COALESCE(mh.service_name, s.name) AS service_name,
           mh.doctor_id, COALESCE(mh.doctor_name, d.name) AS doctor_name,
           mh.record_date, mh.record_time, mh.treatment, mh.remarks, mh.images,
           mh.created_at, mh.updated_at
    FROM medical_history mh
    JOIN patient p ON p.patient_id = mh.patient_id
    LEFT JOIN service s ON s.service_id = mh.service_id
    LEFT JOIN doctor d ON d.doctor_id = mh.doctor_id
"#;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/medical_history", get(list_history).post(create_record))
        .route(
            "/medical_history/{record_id}",
            get(get_record).patch(update_record).delete(delete_record),
        )
}

/// Images must be a JSON array of strings (URLs or data URIs).
pub fn validate_images(images: &JsonValue) -> Result<(), ApiError> {
    match images {
        JsonValue::Array(items) if items.iter().all(JsonValue::is_string) => Ok(()),
        _ => Err(ApiError::validation("images must be an array of strings")),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub patient_id: Option<Uuid>,
}

pub async fn list_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<ApiOk<Vec<MedicalHistoryRow>>>, ApiError> {
    let patient_id = if auth.is_clinic() {
        q.patient_id
    } else {
        Some(auth.own_patient_id()?)
    };

    let rows: Vec<MedicalHistoryRow> = sqlx::query_as::<_, MedicalHistoryRow>(&format!(
        r#"
        {HISTORY_SELECT}
        WHERE ($1::uuid IS NULL OR mh.patient_id = $1)
        ORDER BY mh.record_date DESC, mh.record_time DESC
        "#
    ))
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

async fn load_record(state: &AppState, record_id: Uuid) -> Result<MedicalHistoryRow, ApiError> {
    sqlx::query_as::<_, MedicalHistoryRow>(&format!("{HISTORY_SELECT} WHERE mh.record_id = $1"))
        .bind(record_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("medical history record"))
}

pub async fn get_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<MedicalHistoryRow>>, ApiError> {
    let row = load_record(&state, record_id).await?;
    auth.ensure_patient_access(row.patient_id)?;
    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub patient_id: Uuid,
    pub service_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub doctor_name: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub treatment: String,
    pub remarks: Option<String>,
    pub images: Option<JsonValue>,
}

pub async fn create_record(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateRecordRequest>,
) -> Result<Json<ApiOk<MedicalHistoryRow>>, ApiError> {
    auth.ensure_clinic()?;

    let treatment = require_text(&req.treatment, "treatment")?;
    let images = req.images.unwrap_or_else(|| json!([]));
    validate_images(&images)?;

    // Names are copied so the record still reads correctly after the
    // service or doctor is deleted. Free-text names win over lookups.
    let record_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO medical_history
            (patient_id, service_id, doctor_id, service_name, doctor_name,
             record_date, record_time, treatment, remarks, images)
        VALUES ($1, $2, $3,
                COALESCE($9, (SELECT name FROM service WHERE service_id = $2)),
                COALESCE($10, (SELECT name FROM doctor WHERE doctor_id = $3)),
                $4, $5, $6, $7, $8)
        RETURNING record_id
        "#,
    )
    .bind(req.patient_id)
    .bind(req.service_id)
    .bind(req.doctor_id)
    .bind(req.date)
    .bind(req.time)
    .bind(&treatment)
    .bind(clean_opt(req.remarks.as_deref()))
    .bind(&images)
    .bind(clean_opt(req.service_name.as_deref()))
    .bind(clean_opt(req.doctor_name.as_deref()))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    let row = load_record(&state, record_id).await?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::MedicalHistoryUploaded,
        json!({
            "record_id": record_id,
            "patient": row.patient_name,
            "service": row.service_name,
            "doctor": row.doctor_name,
            "date": fmt_date(row.record_date),
            "time": fmt_time(row.record_time),
        }),
        &ip,
    )
    .await;

    notify::to_patient(
        &state.db,
        row.patient_id,
        NotificationKind::MedicalHistoryUploaded,
        "Medical record added",
        &format!(
            "A new medical record from your visit on {} has been added to your history.",
            fmt_date(row.record_date)
        ),
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRecordRequest {
    pub treatment: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub remarks: Option<Option<String>>,
    pub images: Option<JsonValue>,
}

pub async fn update_record(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(record_id): Path<Uuid>,
    Json(req): Json<UpdateRecordRequest>,
) -> Result<Json<ApiOk<MedicalHistoryRow>>, ApiError> {
    auth.ensure_clinic()?;

    let existing = load_record(&state, record_id).await?;

    let mut updated_fields: Vec<&str> = Vec::new();
    let treatment = match req.treatment.as_deref() {
        Some(t) => {
            updated_fields.push("treatment");
            require_text(t, "treatment")?
        }
        None => existing.treatment.clone(),
    };
    let remarks = match req.remarks {
        Some(r) => {
            updated_fields.push("remarks");
            clean_opt(r.as_deref())
        }
        None => existing.remarks.clone(),
    };
    let images = match req.images {
        Some(i) => {
            validate_images(&i)?;
            updated_fields.push("images");
            i
        }
        None => existing.images.clone(),
    };

    sqlx::query(
        r#"
        UPDATE medical_history
        SET treatment = $1, remarks = $2, images = $3, updated_at = now()
        WHERE record_id = $4
        "#,
    )
    .bind(&treatment)
    .bind(&remarks)
    .bind(&images)
    .bind(record_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::MedicalHistoryUpdated,
        json!({
            "record_id": record_id,
            "patient": existing.patient_name,
            "updated_fields": updated_fields,
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: load_record(&state, record_id).await? }))
}

pub async fn delete_record(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_clinic()?;

    let existing = load_record(&state, record_id).await?;

    sqlx::query("DELETE FROM medical_history WHERE record_id = $1")
        .bind(record_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::MedicalHistoryDeleted,
        json!({
            "record_id": record_id,
            "patient": existing.patient_name,
            "date": fmt_date(existing.record_date),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_images() {
        assert!(validate_images(&json!([])).is_ok());
        assert!(validate_images(&json!(["https://cdn.example/x-ray.png"])).is_ok());
        assert!(validate_images(&json!([1, 2])).is_err());
        assert!(validate_images(&json!("x-ray.png")).is_err());
    }

    #[test]
    fn test_update_body_clears_remarks() {
        let req: UpdateRecordRequest = serde_json::from_str(r#"{"remarks":null}"#).unwrap();
        assert_eq!(req.remarks, Some(None));
        assert!(req.treatment.is_none());
        assert!(req.images.is_none());
    }
}
