// src/notify.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
    NewAppointment,
    CancellationRequest,
    RescheduleRequest,
    AppointmentConfirmed,
    AppointmentCompleted,
    AppointmentRescheduled,
    CancellationApproved,
    CancellationRejected,
    RescheduleApproved,
    RescheduleRejected,
    MedicalHistoryUploaded,
    AppointmentReminder,
    NewPromotion,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        use NotificationKind::*;
        match self {
            Info => "info",
            Warning => "warning",
            Error => "error",
            Success => "success",
            NewAppointment => "new_appointment",
            CancellationRequest => "cancellation_request",
            RescheduleRequest => "reschedule_request",
            AppointmentConfirmed => "appointment_confirmed",
            AppointmentCompleted => "appointment_completed",
            AppointmentRescheduled => "appointment_rescheduled",
            CancellationApproved => "cancellation_approved",
            CancellationRejected => "cancellation_rejected",
            RescheduleApproved => "reschedule_approved",
            RescheduleRejected => "reschedule_rejected",
            MedicalHistoryUploaded => "medical_history_uploaded",
            AppointmentReminder => "appointment_reminder",
            NewPromotion => "new_promotion",
        }
    }
}

/// Where a notice should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// The account linked to the appointment's patient, if any.
    Patient,
    AllStaff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub audience: Audience,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn insert(
    db: &PgPool,
    user_id: Uuid,
    kind: NotificationKind,
    title: &str,
    message: &str,
) -> Result<NotificationRow, sqlx::Error> {
    sqlx::query_as::<_, NotificationRow>(
        r#"
        INSERT INTO notification (user_id, kind, title, message)
        VALUES ($1, $2, $3, $4)
        RETURNING notification_id, user_id, kind, title, message, is_read, created_at
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(title)
    .bind(message)
    .fetch_one(db)
    .await
}

/// Best-effort single notification.
pub async fn to_user(db: &PgPool, user_id: Uuid, kind: NotificationKind, title: &str, message: &str) {
    if let Err(e) = insert(db, user_id, kind, title, message).await {
        tracing::warn!(%user_id, kind = kind.as_str(), error = %e, "failed to create notification");
    }
}

/// Best-effort fan-out to every active account with `role`. Returns how many were written.
pub async fn to_role(db: &PgPool, role: Role, kind: NotificationKind, title: &str, message: &str) -> u64 {
    let res = sqlx::query(
        r#"
        INSERT INTO notification (user_id, kind, title, message)
        SELECT user_id, $2, $3, $4
        FROM app_user
        WHERE role = $1 AND is_active = true
        "#,
    )
    .bind(role)
    .bind(kind.as_str())
    .bind(title)
    .bind(message)
    .execute(db)
    .await;

    match res {
        Ok(r) => r.rows_affected(),
        Err(e) => {
            tracing::warn!(role = role.as_str(), kind = kind.as_str(), error = %e, "failed to fan out notification");
            0
        }
    }
}

/// Best-effort notification to the account linked to a patient record.
/// Patients without an account are skipped.
pub async fn to_patient(db: &PgPool, patient_id: Uuid, kind: NotificationKind, title: &str, message: &str) {
    let user_id: Result<Option<Option<Uuid>>, sqlx::Error> =
        sqlx::query_scalar(r#"SELECT user_id FROM patient WHERE patient_id = $1"#)
            .bind(patient_id)
            .fetch_optional(db)
            .await;

    match user_id {
        Ok(Some(Some(user_id))) => to_user(db, user_id, kind, title, message).await,
        Ok(_) => {}
        Err(e) => tracing::warn!(%patient_id, error = %e, "failed to resolve patient account"),
    }
}

pub async fn deliver(db: &PgPool, patient_id: Uuid, notices: &[Notice]) {
    for n in notices {
        match n.audience {
            Audience::Patient => to_patient(db, patient_id, n.kind, &n.title, &n.message).await,
            Audience::AllStaff => {
                to_role(db, Role::Staff, n.kind, &n.title, &n.message).await;
            }
        }
    }
}

/// Shortens `text` to `max` characters, appending an ellipsis when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_match_serde() {
        for kind in [
            NotificationKind::NewAppointment,
            NotificationKind::RescheduleRejected,
            NotificationKind::AppointmentReminder,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
        let parsed: NotificationKind = serde_json::from_str(r#""new_promotion""#).unwrap();
        assert_eq!(parsed, NotificationKind::NewPromotion);
        assert!(serde_json::from_str::<NotificationKind>(r#""bogus""#).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijk", 5), "abcde...");
    }
}
