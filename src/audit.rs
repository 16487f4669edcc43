// src/audit.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::middleware::auth_context::AuthContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserLogin,
    UserLogout,
    UserRegistered,
    PasswordChange,
    PasswordResetRequested,
    PasswordReset,
    AccountClaimed,
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentConfirmed,
    AppointmentCompleted,
    AppointmentCancelled,
    AppointmentDeleted,
    CancellationRequested,
    CancellationApproved,
    CancellationRejected,
    RescheduleRequested,
    RescheduleApproved,
    RescheduleRejected,
    PatientCreated,
    PatientUpdated,
    PatientDeleted,
    StaffCreated,
    StaffUpdated,
    StaffDisabled,
    StaffEnabled,
    StaffDeleted,
    DoctorCreated,
    DoctorUpdated,
    DoctorDeleted,
    ServiceCreated,
    ServiceUpdated,
    ServiceDeleted,
    ScheduleCreated,
    ScheduleUpdated,
    ScheduleDeleted,
    ClinicHoursUpdated,
    ClinicSettingsUpdated,
    PromotionCreated,
    PromotionUpdated,
    PromotionDeleted,
    MedicalHistoryUploaded,
    MedicalHistoryUpdated,
    MedicalHistoryDeleted,
    DataExport,
    AuditLogsCleared,
    SystemReset,
    Other,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        use AuditAction::*;
        match self {
            UserLogin => "USER_LOGIN",
            UserLogout => "USER_LOGOUT",
            UserRegistered => "USER_REGISTERED",
            PasswordChange => "PASSWORD_CHANGE",
            PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            PasswordReset => "PASSWORD_RESET",
            AccountClaimed => "ACCOUNT_CLAIMED",
            AppointmentCreated => "APPOINTMENT_CREATED",
            AppointmentUpdated => "APPOINTMENT_UPDATED",
            AppointmentConfirmed => "APPOINTMENT_CONFIRMED",
            AppointmentCompleted => "APPOINTMENT_COMPLETED",
            AppointmentCancelled => "APPOINTMENT_CANCELLED",
            AppointmentDeleted => "APPOINTMENT_DELETED",
            CancellationRequested => "CANCELLATION_REQUESTED",
            CancellationApproved => "CANCELLATION_APPROVED",
            CancellationRejected => "CANCELLATION_REJECTED",
            RescheduleRequested => "RESCHEDULE_REQUESTED",
            RescheduleApproved => "RESCHEDULE_APPROVED",
            RescheduleRejected => "RESCHEDULE_REJECTED",
            PatientCreated => "PATIENT_CREATED",
            PatientUpdated => "PATIENT_UPDATED",
            PatientDeleted => "PATIENT_DELETED",
            StaffCreated => "STAFF_CREATED",
            StaffUpdated => "STAFF_UPDATED",
            StaffDisabled => "STAFF_DISABLED",
            StaffEnabled => "STAFF_ENABLED",
            StaffDeleted => "STAFF_DELETED",
            DoctorCreated => "DOCTOR_CREATED",
            DoctorUpdated => "DOCTOR_UPDATED",
            DoctorDeleted => "DOCTOR_DELETED",
            ServiceCreated => "SERVICE_CREATED",
            ServiceUpdated => "SERVICE_UPDATED",
            ServiceDeleted => "SERVICE_DELETED",
            ScheduleCreated => "SCHEDULE_CREATED",
            ScheduleUpdated => "SCHEDULE_UPDATED",
            ScheduleDeleted => "SCHEDULE_DELETED",
            ClinicHoursUpdated => "CLINIC_HOURS_UPDATED",
            ClinicSettingsUpdated => "CLINIC_SETTINGS_UPDATED",
            PromotionCreated => "PROMOTION_CREATED",
            PromotionUpdated => "PROMOTION_UPDATED",
            PromotionDeleted => "PROMOTION_DELETED",
            MedicalHistoryUploaded => "MEDICAL_HISTORY_UPLOADED",
            MedicalHistoryUpdated => "MEDICAL_HISTORY_UPDATED",
            MedicalHistoryDeleted => "MEDICAL_HISTORY_DELETED",
            DataExport => "DATA_EXPORT",
            AuditLogsCleared => "AUDIT_LOGS_CLEARED",
            SystemReset => "SYSTEM_RESET",
            Other => "OTHER",
        }
    }
}

/// Who performed an audited action.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub user_name: String,
    pub user_role: String,
}

impl Actor {
    pub fn guest(name: &str) -> Self {
        Actor {
            user_id: None,
            user_name: name.to_string(),
            user_role: "guest".to_string(),
        }
    }

    pub fn system() -> Self {
        Actor {
            user_id: None,
            user_name: "System".to_string(),
            user_role: "system".to_string(),
        }
    }
}

impl From<&AuthContext> for Actor {
    fn from(auth: &AuthContext) -> Self {
        Actor {
            user_id: Some(auth.user_id),
            user_name: auth.full_name.clone(),
            user_role: auth.role.as_str().to_string(),
        }
    }
}

/// Appends an entry to the audit trail. Failures are logged and swallowed so
/// the audited request itself still succeeds.
pub async fn record(
    db: &PgPool,
    actor: &Actor,
    action: AuditAction,
    details: JsonValue,
    ip_address: &str,
) {
    let res = sqlx::query(
        r#"
        INSERT INTO audit_log (action, details, user_id, user_name, user_role, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(action.as_str())
    .bind(&details)
    .bind(actor.user_id)
    .bind(&actor.user_name)
    .bind(&actor.user_role)
    .bind(ip_address)
    .execute(db)
    .await;

    if let Err(e) = res {
        tracing::warn!(action = action.as_str(), error = %e, "failed to write audit log");
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLogRow {
    pub audit_log_id: Uuid,
    pub action: String,
    pub details: JsonValue,
    pub user_id: Option<Uuid>,
    pub user_name: String,
    pub user_role: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

const CSV_HEADER: &str = "Timestamp,Action,User,Role,IP Address,Details";

/// Renders audit entries as CSV (RFC 4180 quoting).
pub fn to_csv(rows: &[AuditLogRow]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push_str("\r\n");
    for r in rows {
        let details = match &r.details {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        let fields = [
            r.created_at.to_rfc3339(),
            r.action.clone(),
            r.user_name.clone(),
            r.user_role.clone(),
            r.ip_address.clone(),
            details,
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_strings_match_serde() {
        for action in [
            AuditAction::UserLogin,
            AuditAction::CancellationRequested,
            AuditAction::MedicalHistoryUploaded,
            AuditAction::SystemReset,
        ] {
            let via_serde = serde_json::to_value(action).unwrap();
            assert_eq!(via_serde, json!(action.as_str()));
        }
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_to_csv_rows() {
        let row = AuditLogRow {
            audit_log_id: Uuid::new_v4(),
            action: "USER_LOGIN".into(),
            details: json!({"username": "ana"}),
            user_id: None,
            user_name: "Ana, DDS".into(),
            user_role: "admin".into(),
            ip_address: "N/A".into(),
            created_at: Utc::now(),
        };
        let csv = to_csv(&[row]);
        let mut lines = csv.split("\r\n");
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let data = lines.next().unwrap();
        assert!(data.contains(",USER_LOGIN,\"Ana, DDS\",admin,N/A,"));
        assert!(data.ends_with("\"{\"\"username\"\":\"\"ana\"\"}\""));
    }
}
