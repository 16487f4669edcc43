use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub patient_session_ttl_hours: i64,
    pub cron_api_key: Option<String>,
    pub expose_reset_token: bool,
    pub clinic_utc_offset_minutes: i32,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, cfg: &Config) -> Self {
        Self {
            db,
            session_ttl_hours: cfg.session_ttl_hours,
            patient_session_ttl_hours: cfg.patient_session_ttl_hours,
            cron_api_key: cfg.cron_api_key.clone(),
            expose_reset_token: cfg.expose_reset_token,
            clinic_utc_offset_minutes: cfg.clinic_utc_offset_minutes,
        }
    }

    /// Wall-clock time at the clinic.
    pub fn clinic_now(&self) -> NaiveDateTime {
        (Utc::now() + Duration::minutes(self.clinic_utc_offset_minutes as i64)).naive_utc()
    }

    pub fn today(&self) -> NaiveDate {
        self.clinic_now().date()
    }
}

/* -------------------------
   Enumerations (smallint)
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Admin = 1,
    Staff = 2,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Admin => "admin",
            Role::Staff => "staff",
        }
    }

    /// Admin and staff share the clinic back office.
    pub fn is_clinic(self) -> bool {
        matches!(self, Role::Admin | Role::Staff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Completed = 2,
    Cancelled = 3,
    CancellationRequested = 4,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::CancellationRequested => "cancellation_requested",
        }
    }

    /// Still occupies the doctor's chair.
    pub fn holds_slot(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    /// Neither cancelled nor completed.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Completed
        )
    }
}

/* -------------------------
   Response envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

impl ApiOk<OkData> {
    pub fn ok() -> Self {
        ApiOk { data: OkData { ok: true } }
    }
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub patient_id: Option<Uuid>,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            role: self.role,
            patient_id: self.patient_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Distinguishes an absent PATCH field from an explicit `null`.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/// Trims, and maps empty strings to `None`.
pub fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Trimmed, lower-cased and syntactically valid.
pub fn normalize_email(raw: &str) -> Result<String, crate::error::ApiError> {
    let email = raw.trim().to_lowercase();
    if !validator::validate_email(email.as_str()) {
        return Err(crate::error::ApiError::validation("email is not a valid address"));
    }
    Ok(email)
}

pub fn require_text(value: &str, field: &str) -> Result<String, crate::error::ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(crate::error::ApiError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

/// Usernames share the login field with emails, so they may not contain `@`.
pub fn validate_username(username: &str) -> Result<String, crate::error::ApiError> {
    let u = username.trim();
    if u.chars().count() < 3 {
        return Err(crate::error::ApiError::validation("username must be at least 3 characters"));
    }
    if u.chars().any(char::is_whitespace) {
        return Err(crate::error::ApiError::validation("username must not contain spaces"));
    }
    if u.contains('@') {
        return Err(crate::error::ApiError::validation("username must not contain '@'"));
    }
    Ok(u.to_string())
}

/// Which login name of a new account collides with an existing account.
pub fn login_clash(existing_username: &str, existing_email: &str, username: &str) -> &'static str {
    if existing_username == username || existing_email.eq_ignore_ascii_case(username) {
        "username"
    } else {
        "email"
    }
}

/// Conflict when `username` or `email` is already taken as either login name.
pub async fn ensure_login_free(
    db: &sqlx::PgPool,
    username: &str,
    email: &str,
) -> Result<(), crate::error::ApiError> {
    let taken: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT username, email
        FROM app_user
        WHERE username = $1
           OR lower(email) = lower($1)
           OR lower(username) = $2
           OR lower(email) = $2
        LIMIT 1
        "#,
    )
    .bind(username)
    .bind(email)
    .fetch_optional(db)
    .await
    .map_err(crate::error::ApiError::db)?;

    match taken {
        Some((u, e)) => Err(crate::error::ApiError::Conflict(
            "ALREADY_EXISTS",
            format!("An account with this {} already exists", login_clash(&u, &e, username)),
        )),
        None => Ok(()),
    }
}

pub async fn load_clinic_name(db: &sqlx::PgPool) -> Result<String, crate::error::ApiError> {
    let clinic_name: Option<String> = sqlx::query_scalar(
        r#"
        SELECT clinic_name
        FROM clinic_settings
        WHERE singleton_id = TRUE
        "#,
    )
    .fetch_optional(db)
    .await
    .map_err(crate::error::ApiError::db)?;

    Ok(clinic_name.unwrap_or_else(|| "Dental Clinic".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_double_option")]
        phone: Option<Option<String>>,
    }

    #[test]
    fn test_double_option() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.phone, None);
        let null: Patch = serde_json::from_str(r#"{"phone":null}"#).unwrap();
        assert_eq!(null.phone, Some(None));
        let set: Patch = serde_json::from_str(r#"{"phone":"555"}"#).unwrap();
        assert_eq!(set.phone, Some(Some("555".into())));
    }

    #[test]
    fn test_status_serde_and_flags() {
        let s: AppointmentStatus = serde_json::from_str(r#""cancellation_requested""#).unwrap();
        assert_eq!(s, AppointmentStatus::CancellationRequested);
        assert_eq!(serde_json::to_string(&AppointmentStatus::Pending).unwrap(), r#""pending""#);
        assert!(s.holds_slot());
        assert!(s.is_active());
        assert!(!AppointmentStatus::Cancelled.holds_slot());
        assert!(!AppointmentStatus::Completed.is_active());
    }

    #[test]
    fn test_role_flags() {
        assert!(Role::Admin.is_clinic());
        assert!(Role::Staff.is_clinic());
        assert!(!Role::Patient.is_clinic());
        assert_eq!(Role::Staff.as_str(), "staff");
    }

    #[test]
    fn test_clean_opt() {
        assert_eq!(clean_opt(Some("  ")), None);
        assert_eq!(clean_opt(Some(" a ")), Some("a".into()));
        assert_eq!(clean_opt(None), None);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ana@Clinic.COM ").unwrap(), "ana@clinic.com");
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("").is_err());
    }

    #[test]
    fn test_require_text() {
        assert_eq!(require_text(" Cleaning ", "name").unwrap(), "Cleaning");
        assert!(require_text("   ", "name").is_err());
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  maria ").unwrap(), "maria");
        assert!(validate_username("al").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username("two words").is_err());
        assert!(validate_username("victim@example.com").is_err());
    }

    #[test]
    fn test_login_clash() {
        assert_eq!(login_clash("ana", "Ana@Clinic.com", "ana@clinic.com"), "username");
        assert_eq!(login_clash("maria", "m@x.com", "maria"), "username");
        assert_eq!(login_clash("ana", "a@x.com", "maria"), "email");
    }
}
