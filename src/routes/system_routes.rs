// src/routes/system_routes.rs

use axum::{
    extract::State,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use crate::{
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{ApiOk, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/system/reset", delete(reset))
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<ApiOk<HealthData>> {
    Json(ApiOk {
        data: HealthData {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Tables cleared by a reset, children before parents.
pub const RESET_STEPS: [(&str, &str); 7] = [
    ("appointment_service", "DELETE FROM appointment_service"),
    ("medical_history", "DELETE FROM medical_history"),
    ("appointment", "DELETE FROM appointment"),
    ("patient", "DELETE FROM patient"),
    ("app_user", "DELETE FROM app_user WHERE role = 0"),
    ("notification", "DELETE FROM notification"),
    ("audit_log", "DELETE FROM audit_log"),
];

#[derive(Debug, Serialize)]
pub struct ResetData {
    pub message: String,
    pub errors: Vec<String>,
}

pub fn reset_message(errors: &[String]) -> String {
    if errors.is_empty() {
        "System reset complete".to_string()
    } else {
        format!("System reset finished with {} error(s)", errors.len())
    }
}

/// Wipes patient data while keeping staff accounts, doctors, services and
/// settings. A failing table does not stop the remaining steps.
pub async fn reset(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
) -> Result<Json<ApiOk<ResetData>>, ApiError> {
    auth.ensure_admin()?;

    let mut errors: Vec<String> = Vec::new();
    for (table, sql) in RESET_STEPS {
        match sqlx::query(sql).execute(&state.db).await {
            Ok(res) => tracing::info!(table, rows = res.rows_affected(), "reset step done"),
            Err(e) => {
                tracing::warn!(table, error = %e, "reset step failed");
                errors.push(format!("{table}: {e}"));
            }
        }
    }

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::SystemReset,
        json!({ "tables": RESET_STEPS.map(|(t, _)| t), "errors": errors }),
        &ip,
    )
    .await;

    tracing::info!(user_id = %auth.user_id, failures = errors.len(), "system reset performed");

    Ok(Json(ApiOk {
        data: ResetData {
            message: reset_message(&errors),
            errors,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_order_clears_children_first() {
        let tables: Vec<&str> = RESET_STEPS.iter().map(|(t, _)| *t).collect();
        let pos = |name: &str| tables.iter().position(|t| *t == name).unwrap();
        assert!(pos("appointment_service") < pos("appointment"));
        assert!(pos("medical_history") < pos("patient"));
        assert!(pos("appointment") < pos("patient"));
        assert!(pos("patient") < pos("app_user"));
        assert_eq!(tables.last(), Some(&"audit_log"));
    }

    #[test]
    fn test_reset_message() {
        assert_eq!(reset_message(&[]), "System reset complete");
        assert_eq!(
            reset_message(&["patient: boom".to_string()]),
            "System reset finished with 1 error(s)"
        );
    }
}
