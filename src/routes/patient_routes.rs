// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{
        clean_opt, deserialize_double_option, normalize_email, require_text, ApiOk, AppState,
        OkData,
    },
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub profile_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PATIENT_COLUMNS: &str = "patient_id, user_id, full_name, email, phone, date_of_birth, gender, address, profile_image, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route("/patients/me", get(get_my_patient))
        .route(
            "/patients/{patient_id}",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
}

pub async fn load_patient(state: &AppState, patient_id: Uuid) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1"
    ))
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient"))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    auth.ensure_clinic()?;

    let like = clean_opt(q.query.as_deref()).map(|s| format!("%{s}%"));

    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE $1::text IS NULL
           OR full_name ILIKE $1
           OR email ILIKE $1
           OR phone ILIKE $1
        ORDER BY full_name ASC
        "#
    ))
    .bind(like)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_my_patient(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    let patient_id = auth.own_patient_id()?;
    Ok(Json(ApiOk { data: load_patient(&state, patient_id).await? }))
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.ensure_patient_access(patient_id)?;
    Ok(Json(ApiOk { data: load_patient(&state, patient_id).await? }))
}

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.ensure_clinic()?;

    let full_name = require_text(&req.full_name, "full_name")?;
    let email = normalize_email(&req.email)?;

    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        INSERT INTO patient (full_name, email, phone, date_of_birth, gender, address)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(&full_name)
    .bind(&email)
    .bind(clean_opt(req.phone.as_deref()))
    .bind(req.date_of_birth)
    .bind(clean_opt(req.gender.as_deref()))
    .bind(clean_opt(req.address.as_deref()))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::PatientCreated,
        json!({ "patient_id": row.patient_id, "name": full_name, "email": email }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub gender: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub profile_image: Option<Option<String>>,
}

/// Resolves a nullable PATCH text field against the stored value.
fn merge_text(
    field: Option<Option<String>>,
    existing: Option<String>,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) -> Option<String> {
    match field {
        None => existing,
        Some(v) => {
            changed.push(name);
            clean_opt(v.as_deref())
        }
    }
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.ensure_patient_access(patient_id)?;

    let existing = load_patient(&state, patient_id).await?;
    let mut changed: Vec<&'static str> = Vec::new();

    let full_name = match req.full_name.as_deref() {
        Some(name) => {
            changed.push("full_name");
            require_text(name, "full_name")?
        }
        None => existing.full_name,
    };
    let email = match req.email.as_deref() {
        Some(raw) => {
            changed.push("email");
            normalize_email(raw)?
        }
        None => existing.email,
    };
    let date_of_birth = match req.date_of_birth {
        None => existing.date_of_birth,
        Some(v) => {
            changed.push("date_of_birth");
            v
        }
    };
    let phone = merge_text(req.phone, existing.phone, "phone", &mut changed);
    let gender = merge_text(req.gender, existing.gender, "gender", &mut changed);
    let address = merge_text(req.address, existing.address, "address", &mut changed);
    let profile_image = merge_text(req.profile_image, existing.profile_image, "profile_image", &mut changed);

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patient
        SET full_name = $1,
            email = $2,
            phone = $3,
            date_of_birth = $4,
            gender = $5,
            address = $6,
            profile_image = $7,
            updated_at = now()
        WHERE patient_id = $8
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(&full_name)
    .bind(&email)
    .bind(phone)
    .bind(date_of_birth)
    .bind(gender)
    .bind(address)
    .bind(profile_image)
    .bind(patient_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db_write)?;

    // keep the linked account's display name and login email in step
    if let Some(user_id) = updated.user_id {
        sqlx::query(
            r#"
            UPDATE app_user
            SET full_name = $1, email = $2, updated_at = now()
            WHERE user_id = $3
            "#,
        )
        .bind(&full_name)
        .bind(&email)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db_write)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::PatientUpdated,
        json!({ "patient_id": patient_id, "name": updated.full_name, "updated_fields": changed }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: updated }))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;

    let patient = load_patient(&state, patient_id).await?;

    let upcoming: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM appointment
        WHERE patient_id = $1
          AND appointment_date >= $2
          AND status NOT IN (2, 3)
        "#,
    )
    .bind(patient_id)
    .bind(state.today())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if upcoming > 0 {
        return Err(ApiError::BadRequest(
            "HAS_FUTURE_APPOINTMENTS",
            format!("Patient has {upcoming} upcoming appointment(s); cancel them first"),
        ));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    for sql in [
        "DELETE FROM appointment WHERE patient_id = $1",
        "DELETE FROM medical_history WHERE patient_id = $1",
        "DELETE FROM patient WHERE patient_id = $1",
    ] {
        sqlx::query(sql)
            .bind(patient_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db_write)?;
    }

    if let Some(user_id) = patient.user_id {
        sqlx::query("DELETE FROM app_user WHERE user_id = $1 AND role = 0")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db_write)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::PatientDeleted,
        json!({ "patient_id": patient_id, "name": patient.full_name, "email": patient.email }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_text_tracks_changes() {
        let mut changed = Vec::new();
        assert_eq!(merge_text(None, Some("555".into()), "phone", &mut changed), Some("555".into()));
        assert!(changed.is_empty());

        assert_eq!(merge_text(Some(None), Some("555".into()), "phone", &mut changed), None);
        assert_eq!(
            merge_text(Some(Some("  Main St ".into())), None, "address", &mut changed),
            Some("Main St".into())
        );
        assert_eq!(merge_text(Some(Some("   ".into())), Some("x".into()), "gender", &mut changed), None);
        assert_eq!(changed, vec!["phone", "address", "gender"]);
    }

    #[test]
    fn test_patch_body_shapes() {
        let req: UpdatePatientRequest =
            serde_json::from_str(r#"{"phone":null,"date_of_birth":"1990-04-02"}"#).unwrap();
        assert_eq!(req.phone, Some(None));
        assert_eq!(req.date_of_birth, Some(NaiveDate::from_ymd_opt(1990, 4, 2)));
        assert!(req.address.is_none());
        assert!(req.full_name.is_none());
    }
}
