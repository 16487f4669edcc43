// src/routes/home_routes.rs

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{load_clinic_name, ApiOk, AppState, Role};

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

#[derive(Debug, Serialize)]
pub struct HomeData {
    pub view: &'static str,
    pub clinic_name: String,
    pub greeting: String,
    pub unread_notifications: i64,
    /// Patient: own upcoming visits. Clinic: today's appointments.
    pub appointments: i64,
    /// Clinic only: pending bookings plus open cancellation/reschedule requests.
    pub awaiting_action: Option<i64>,
}

pub fn landing_view(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin_dashboard",
        Role::Staff => "staff_dashboard",
        Role::Patient => "patient_portal",
    }
}

pub async fn home(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<HomeData>>, ApiError> {
    let clinic_name = load_clinic_name(&state.db).await?;
    let today = state.today();

    let unread_notifications: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notification WHERE user_id = $1 AND is_read = false",
    )
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    let (appointments, awaiting_action) = if auth.is_clinic() {
        let (todays, awaiting): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE appointment_date = $1 AND status <> 3),
                COUNT(*) FILTER (WHERE status IN (0, 4) OR reschedule_requested)
            FROM appointment
            "#,
        )
        .bind(today)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
        (todays, Some(awaiting))
    } else {
        let upcoming: i64 = match auth.patient_id {
            Some(patient_id) => sqlx::query_scalar(
                r#"
                SELECT COUNT(*)
                FROM appointment
                WHERE patient_id = $1
                  AND appointment_date >= $2
                  AND status IN (0, 1, 4)
                "#,
            )
            .bind(patient_id)
            .bind(today)
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?,
            None => 0,
        };
        (upcoming, None)
    };

    Ok(Json(ApiOk {
        data: HomeData {
            view: landing_view(auth.role),
            clinic_name,
            greeting: format!("Welcome back, {}", auth.full_name),
            unread_notifications,
            appointments,
            awaiting_action,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landing_view() {
        assert_eq!(landing_view(Role::Admin), "admin_dashboard");
        assert_eq!(landing_view(Role::Staff), "staff_dashboard");
        assert_eq!(landing_view(Role::Patient), "patient_portal");
    }
}
