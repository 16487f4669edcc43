// src/routes/staff_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction},
    auth::{hash_password, validate_new_password, verify_password},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{
        clean_opt, deserialize_double_option, ensure_login_free, normalize_email, require_text,
        validate_username, ApiOk, AppState, OkData, Role,
    },
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StaffRow {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const STAFF_COLUMNS: &str =
    "user_id, username, email, full_name, position, phone, is_active, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/staff", get(list_staff).post(create_staff))
        .route(
            "/staff/{user_id}",
            get(get_staff).patch(update_staff).delete(delete_staff),
        )
        .route("/staff/{user_id}/disable", post(disable_staff))
        .route("/staff/{user_id}/enable", post(enable_staff))
}

async fn load_staff(state: &AppState, user_id: Uuid) -> Result<StaffRow, ApiError> {
    sqlx::query_as::<_, StaffRow>(&format!(
        "SELECT {STAFF_COLUMNS} FROM app_user WHERE user_id = $1 AND role = $2"
    ))
    .bind(user_id)
    .bind(Role::Staff)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("staff member"))
}

pub async fn list_staff(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<StaffRow>>>, ApiError> {
    auth.ensure_admin()?;

    let rows: Vec<StaffRow> = sqlx::query_as::<_, StaffRow>(&format!(
        "SELECT {STAFF_COLUMNS} FROM app_user WHERE role = $1 ORDER BY full_name ASC"
    ))
    .bind(Role::Staff)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_staff(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<StaffRow>>, ApiError> {
    if !auth.is_admin() && auth.user_id != user_id {
        return Err(ApiError::forbidden("You can only view your own profile"));
    }
    Ok(Json(ApiOk { data: load_staff(&state, user_id).await? }))
}

#[derive(Debug, Deserialize)]
pub struct CreateStaffRequest {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub position: Option<String>,
    pub phone: Option<String>,
}

pub async fn create_staff(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateStaffRequest>,
) -> Result<Json<ApiOk<StaffRow>>, ApiError> {
    auth.ensure_admin()?;

    let username = validate_username(&req.username)?;
    let email = normalize_email(&req.email)?;
    let full_name = require_text(&req.full_name, "full_name")?;
    validate_new_password(&req.password)?;
    ensure_login_free(&state.db, &username, &email).await?;
    let pw_hash = hash_password(&req.password)?;

    let row: StaffRow = sqlx::query_as::<_, StaffRow>(&format!(
        r#"
        INSERT INTO app_user (username, email, full_name, password_hash, role, position, phone)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {STAFF_COLUMNS}
        "#
    ))
    .bind(&username)
    .bind(&email)
    .bind(&full_name)
    .bind(&pw_hash)
    .bind(Role::Staff)
    .bind(clean_opt(req.position.as_deref()))
    .bind(clean_opt(req.phone.as_deref()))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::StaffCreated,
        json!({ "staff_id": row.user_id, "username": username, "name": full_name }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStaffRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Required when staff change their own password.
    pub current_password: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub position: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
}

impl UpdateStaffRequest {
    fn new_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// The password to verify before applying the edit, if any.
    fn current_password_check(&self, self_edit: bool) -> Result<Option<&str>, ApiError> {
        if !self_edit || self.new_password().is_none() {
            return Ok(None);
        }
        self.current_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Some)
            .ok_or_else(|| ApiError::validation("current_password is required"))
    }
}

pub async fn update_staff(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateStaffRequest>,
) -> Result<Json<ApiOk<StaffRow>>, ApiError> {
    if !auth.is_admin() && auth.user_id != user_id {
        return Err(ApiError::forbidden("You can only edit your own profile"));
    }

    let existing = load_staff(&state, user_id).await?;

    if let Some(current) = req.current_password_check(auth.user_id == user_id)? {
        let stored: String =
            sqlx::query_scalar("SELECT password_hash FROM app_user WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&state.db)
                .await
                .map_err(ApiError::db)?;
        if !verify_password(current, &stored) {
            return Err(ApiError::invalid_credentials());
        }
    }

    let mut changed: Vec<&str> = Vec::new();
    let new_password = req.new_password().map(str::to_string);

    let full_name = match req.full_name.as_deref() {
        Some(n) => {
            changed.push("full_name");
            require_text(n, "full_name")?
        }
        None => existing.full_name,
    };
    let email = match req.email.as_deref() {
        Some(e) => {
            changed.push("email");
            normalize_email(e)?
        }
        None => existing.email,
    };
    let position = match req.position {
        Some(p) => {
            changed.push("position");
            clean_opt(p.as_deref())
        }
        None => existing.position,
    };
    let phone = match req.phone {
        Some(p) => {
            changed.push("phone");
            clean_opt(p.as_deref())
        }
        None => existing.phone,
    };
    let password_hash = match new_password.as_deref() {
        Some(pw) => {
            validate_new_password(pw)?;
            changed.push("password");
            Some(hash_password(pw)?)
        }
        None => None,
    };

    let updated: StaffRow = sqlx::query_as::<_, StaffRow>(&format!(
        r#"
        UPDATE app_user
        SET full_name = $1,
            email = $2,
            position = $3,
            phone = $4,
            password_hash = COALESCE($5, password_hash),
            updated_at = now()
        WHERE user_id = $6
        RETURNING {STAFF_COLUMNS}
        "#
    ))
    .bind(&full_name)
    .bind(&email)
    .bind(position)
    .bind(phone)
    .bind(password_hash)
    .bind(user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::StaffUpdated,
        json!({ "staff_id": user_id, "name": full_name, "updated_fields": changed }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: updated }))
}

async fn set_active(
    state: &AppState,
    auth: &AuthContext,
    ip: &str,
    user_id: Uuid,
    active: bool,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let name: String = sqlx::query_scalar(
        r#"
        UPDATE app_user
        SET is_active = $1, updated_at = now()
        WHERE user_id = $2 AND role = $3
        RETURNING full_name
        "#,
    )
    .bind(active)
    .bind(user_id)
    .bind(Role::Staff)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("staff member"))?;

    if !active {
        sqlx::query(
            r#"
            UPDATE session_token
            SET revoked_at = now()
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    let action = if active { AuditAction::StaffEnabled } else { AuditAction::StaffDisabled };
    audit::record(
        &state.db,
        &Actor::from(auth),
        action,
        json!({ "staff_id": user_id, "name": name }),
        ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

pub async fn disable_staff(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    set_active(&state, &auth, &ip, user_id, false).await
}

pub async fn enable_staff(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    set_active(&state, &auth, &ip, user_id, true).await
}

pub async fn delete_staff(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;

    let name: String = sqlx::query_scalar(
        r#"
        DELETE FROM app_user
        WHERE user_id = $1 AND role = $2
        RETURNING full_name
        "#,
    )
    .bind(user_id)
    .bind(Role::Staff)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db_write)?
    .ok_or_else(|| ApiError::not_found("staff member"))?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::StaffDeleted,
        json!({ "staff_id": user_id, "name": name }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_body_distinguishes_null() {
        let req: UpdateStaffRequest = serde_json::from_str(r#"{"position":null}"#).unwrap();
        assert_eq!(req.position, Some(None));
        assert!(req.phone.is_none());
        assert!(req.password.is_none());
    }

    #[test]
    fn test_own_password_change_needs_current() {
        let req: UpdateStaffRequest = serde_json::from_str(r#"{"password":"newsecret"}"#).unwrap();
        assert!(req.current_password_check(true).is_err());
        assert_eq!(req.current_password_check(false).unwrap(), None);

        let req: UpdateStaffRequest =
            serde_json::from_str(r#"{"password":"newsecret","current_password":"oldsecret"}"#)
                .unwrap();
        assert_eq!(req.current_password_check(true).unwrap(), Some("oldsecret"));

        let req: UpdateStaffRequest =
            serde_json::from_str(r#"{"full_name":"Maria Cruz","password":""}"#).unwrap();
        assert_eq!(req.current_password_check(true).unwrap(), None);
    }
}
