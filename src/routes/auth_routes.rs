use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    audit::{self, Actor, AuditAction},
    auth::{
        generate_access_token, hash_access_token, hash_password, reset_token_expiry,
        validate_new_password, verify_password,
    },
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::*,
};

const REMEMBER_ME_TTL_HOURS: i64 = 24 * 7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
        .route("/verify_password", post(verify_own_password))
        .route("/recover", post(recover))
        .route("/reset/verify", get(verify_reset_token))
        .route("/reset", post(reset_password))
        .route("/claim", get(claim_status).post(claim_account))
}

const USER_SELECT: &str = r#"
    SELECT u.user_id, u.username, u.email, u.full_name, u.password_hash, u.role, u.is_active,
           p.patient_id
    FROM app_user u
    LEFT JOIN patient p ON p.user_id = u.user_id
"#;

/* ============================================================
   Login / session
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!(
        "{USER_SELECT} WHERE u.username = $1 OR lower(u.email) = lower($1)
         ORDER BY (u.username = $1) DESC
         LIMIT 1"
    ))
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::forbidden("Account is disabled"));
    }

    let clinic_name = load_clinic_name(&state.db).await?;

    let access_token = generate_access_token();
    let ttl_hours = if req.remember_me.unwrap_or(false) {
        REMEMBER_ME_TTL_HOURS
    } else if user.role == Role::Patient {
        state.patient_session_ttl_hours
    } else {
        state.session_ttl_hours
    };

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user.user_id)
    .bind(hash_access_token(&access_token))
    .bind(req.device_name.as_deref())
    .bind(Utc::now() + Duration::hours(ttl_hours))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    let actor = Actor {
        user_id: Some(user.user_id),
        user_name: user.full_name.clone(),
        user_role: user.role.as_str().to_string(),
    };
    audit::record(
        &state.db,
        &actor,
        AuditAction::UserLogin,
        json!({ "username": user.username }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk {
        data: LoginData {
            access_token,
            expires_at: session.expires_at,
            user: user.profile(),
            clinic: ClinicProfile { clinic_name },
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserProfile,
    pub clinic: ClinicProfile,
    pub session: SessionInfo,
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!("{USER_SELECT} WHERE u.user_id = $1"))
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(ApiError::session_expired)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let clinic_name = load_clinic_name(&state.db).await?;

    Ok(Json(ApiOk {
        data: MeData {
            user: user.profile(),
            clinic: ClinicProfile { clinic_name },
            session: SessionInfo {
                session_token_id: session.session_token_id,
                expires_at: session.expires_at,
            },
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    audit::record(&state.db, &Actor::from(&auth), AuditAction::UserLogout, json!({}), &ip).await;
    Ok(Json(ApiOk::ok()))
}

/* ============================================================
   Registration
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    let full_name = require_text(&req.full_name, "full_name")?;
    let username = validate_username(&req.username)?;
    let email = normalize_email(&req.email)?;
    validate_new_password(&req.password)?;

    ensure_login_free(&state.db, &username, &email).await?;

    let unclaimed: Option<uuid::Uuid> = sqlx::query_scalar(
        r#"SELECT patient_id FROM patient WHERE lower(email) = $1 AND user_id IS NULL"#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    if unclaimed.is_some() {
        return Err(ApiError::Conflict(
            "CLAIMABLE_PATIENT",
            "A patient record with this email already exists; claim it instead".into(),
        ));
    }

    let password_hash = hash_password(&req.password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user_id: uuid::Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO app_user (username, email, full_name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING user_id
        "#,
    )
    .bind(&username)
    .bind(&email)
    .bind(&full_name)
    .bind(&password_hash)
    .bind(Role::Patient)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db_write)?;

    let patient_id: uuid::Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO patient (user_id, full_name, email, phone, date_of_birth, gender, address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING patient_id
        "#,
    )
    .bind(user_id)
    .bind(&full_name)
    .bind(&email)
    .bind(clean_opt(req.phone.as_deref()))
    .bind(req.date_of_birth)
    .bind(clean_opt(req.gender.as_deref()))
    .bind(clean_opt(req.address.as_deref()))
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db_write)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, %patient_id, "patient registered");
    audit::record(
        &state.db,
        &Actor { user_id: Some(user_id), user_name: full_name.clone(), user_role: "patient".into() },
        AuditAction::UserRegistered,
        json!({ "username": username, "email": email }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk {
        data: UserProfile {
            user_id,
            username,
            full_name,
            email,
            role: Role::Patient,
            patient_id: Some(patient_id),
        },
    }))
}

/* ============================================================
   Password management
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

async fn load_password_hash(state: &AppState, user_id: uuid::Uuid) -> Result<String, ApiError> {
    sqlx::query_scalar(
        r#"
        SELECT password_hash
        FROM app_user
        WHERE user_id = $1
          AND is_active = true
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    if req.current_password.is_empty() {
        return Err(ApiError::validation("current_password is required"));
    }
    validate_new_password(&req.new_password)?;

    let stored = load_password_hash(&state, auth.user_id).await?;
    if !verify_password(&req.current_password, &stored) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE app_user
        SET password_hash = $1, updated_at = now()
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    // keep the current session
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    audit::record(&state.db, &Actor::from(&auth), AuditAction::PasswordChange, json!({}), &ip).await;
    Ok(Json(ApiOk::ok()))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifiedData {
    pub verified: bool,
}

/// Re-authentication before sensitive screens such as the audit log.
pub async fn verify_own_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<VerifyPasswordRequest>,
) -> Result<Json<ApiOk<VerifiedData>>, ApiError> {
    let stored = load_password_hash(&state, auth.user_id).await?;
    if !verify_password(&req.password, &stored) {
        return Err(ApiError::invalid_credentials());
    }
    Ok(Json(ApiOk { data: VerifiedData { verified: true } }))
}

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RecoverData {
    pub ok: bool,
    pub expires_at: DateTime<Utc>,
    /// Only present when the server is configured to hand tokens back.
    pub reset_token: Option<String>,
}

pub async fn recover(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<RecoverRequest>,
) -> Result<Json<ApiOk<RecoverData>>, ApiError> {
    let email = normalize_email(&req.email)?;

    let token = generate_access_token();
    let expires_at = reset_token_expiry(Utc::now());

    let user: Option<(uuid::Uuid, String, Role)> = sqlx::query_as(
        r#"
        UPDATE app_user
        SET reset_token_hash = $1, reset_token_expires = $2
        WHERE lower(email) = $3 AND is_active = true
        RETURNING user_id, full_name, role
        "#,
    )
    .bind(hash_access_token(&token))
    .bind(expires_at)
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    let (user_id, full_name, role) =
        user.ok_or_else(|| ApiError::NotFound("NOT_FOUND", "No account found with this email".into()))?;

    audit::record(
        &state.db,
        &Actor { user_id: Some(user_id), user_name: full_name, user_role: role.as_str().into() },
        AuditAction::PasswordResetRequested,
        json!({ "email": email }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk {
        data: RecoverData {
            ok: true,
            expires_at,
            reset_token: state.expose_reset_token.then_some(token),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ValidData {
    pub valid: bool,
}

pub async fn verify_reset_token(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<ApiOk<ValidData>>, ApiError> {
    let found: Option<uuid::Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM app_user
        WHERE reset_token_hash = $1
          AND reset_token_expires > now()
        "#,
    )
    .bind(hash_access_token(q.token.trim()))
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: ValidData { valid: found.is_some() } }))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    validate_new_password(&req.new_password)?;
    let new_hash = hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    // clearing the hash makes the token single-use
    let user: (uuid::Uuid, String, Role) = sqlx::query_as(
        r#"
        UPDATE app_user
        SET password_hash = $1,
            reset_token_hash = NULL,
            reset_token_expires = NULL,
            updated_at = now()
        WHERE reset_token_hash = $2
          AND reset_token_expires > now()
        RETURNING user_id, full_name, role
        "#,
    )
    .bind(new_hash)
    .bind(hash_access_token(req.token.trim()))
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::BadRequest("INVALID_TOKEN", "Reset token is invalid or expired".into()))?;

    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(user.0)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor { user_id: Some(user.0), user_name: user.1, user_role: user.2.as_str().into() },
        AuditAction::PasswordReset,
        json!({}),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

/* ============================================================
   Claiming a patient record
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ClaimQuery {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimStatus {
    pub claimable: bool,
    pub full_name: Option<String>,
}

async fn find_unclaimed_patient(
    db: &sqlx::PgPool,
    email: &str,
) -> Result<Option<(uuid::Uuid, String)>, ApiError> {
    sqlx::query_as(
        r#"
        SELECT p.patient_id, p.full_name
        FROM patient p
        WHERE lower(p.email) = $1
          AND p.user_id IS NULL
          AND NOT EXISTS (SELECT 1 FROM app_user u WHERE lower(u.email) = $1)
        "#,
    )
    .bind(email)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)
}

pub async fn claim_status(
    State(state): State<AppState>,
    Query(q): Query<ClaimQuery>,
) -> Result<Json<ApiOk<ClaimStatus>>, ApiError> {
    let email = normalize_email(&q.email)?;
    let found = find_unclaimed_patient(&state.db, &email).await?;
    Ok(Json(ApiOk {
        data: ClaimStatus {
            claimable: found.is_some(),
            full_name: found.map(|(_, name)| name),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub email: String,
    pub username: Option<String>,
    pub new_password: String,
}

pub async fn claim_account(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    let email = normalize_email(&req.email)?;
    validate_new_password(&req.new_password)?;
    // Without an explicit username the account logs in with its own email.
    let username = match clean_opt(req.username.as_deref()) {
        Some(u) => validate_username(&u)?,
        None => email.clone(),
    };
    ensure_login_free(&state.db, &username, &email).await?;

    let (patient_id, full_name) = find_unclaimed_patient(&state.db, &email)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("NOT_FOUND", "No unclaimed patient record for this email".into())
        })?;

    let password_hash = hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user_id: uuid::Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO app_user (username, email, full_name, password_hash, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING user_id
        "#,
    )
    .bind(&username)
    .bind(&email)
    .bind(&full_name)
    .bind(password_hash)
    .bind(Role::Patient)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db_write)?;

    let linked = sqlx::query(
        r#"
        UPDATE patient
        SET user_id = $1, updated_at = now()
        WHERE patient_id = $2 AND user_id IS NULL
        "#,
    )
    .bind(user_id)
    .bind(patient_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db_write)?;

    if linked.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "ALREADY_CLAIMED",
            "This patient record has already been claimed".into(),
        ));
    }

    tx.commit().await.map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor { user_id: Some(user_id), user_name: full_name.clone(), user_role: "patient".into() },
        AuditAction::AccountClaimed,
        json!({ "email": email, "patient_id": patient_id }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk {
        data: UserProfile {
            user_id,
            username,
            full_name,
            email,
            role: Role::Patient,
            patient_id: Some(patient_id),
        },
    }))
}
