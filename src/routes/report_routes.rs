// src/routes/report_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, AppointmentStatus},
    reports::{self, Dashboard, DashboardPeriod, ReportAppointment, ReportDoctor, ReportPatient, ReportRange, ReportSummary},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reports/summary", get(get_summary))
        .route("/reports/dashboard", get(get_dashboard))
}

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    appointment_id: Uuid,
    patient_id: Uuid,
    patient_name: String,
    doctor_id: Uuid,
    doctor_name: String,
    service_name: String,
    appointment_date: NaiveDate,
    appointment_time: NaiveTime,
    status: AppointmentStatus,
    reschedule_requested: bool,
    payment_amount_cents: Option<i64>,
    services_price_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

/// Calendar day at the clinic for a stored timestamp.
pub fn local_date(ts: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
    (ts + Duration::minutes(offset_minutes as i64)).date_naive()
}

impl ReportRow {
    fn into_report(self, offset_minutes: i32) -> ReportAppointment {
        ReportAppointment {
            appointment_id: self.appointment_id,
            patient_id: self.patient_id,
            patient_name: self.patient_name,
            doctor_id: self.doctor_id,
            doctor_name: self.doctor_name,
            service_name: self.service_name,
            date: self.appointment_date,
            time: self.appointment_time,
            status: self.status,
            reschedule_requested: self.reschedule_requested,
            payment_amount_cents: self.payment_amount_cents,
            services_price_cents: self.services_price_cents,
            created_on: local_date(self.created_at, offset_minutes),
            updated_on: local_date(self.updated_at, offset_minutes),
            completed_on: self.completed_at.map(|t| local_date(t, offset_minutes)),
        }
    }
}

struct ReportInput {
    appointments: Vec<ReportAppointment>,
    patients: Vec<ReportPatient>,
    doctors: Vec<ReportDoctor>,
}

async fn load_input(state: &AppState) -> Result<ReportInput, ApiError> {
    let rows: Vec<ReportRow> = sqlx::query_as::<_, ReportRow>(
        r#"
        SELECT a.appointment_id, a.patient_id, p.full_name AS patient_name,
               a.doctor_id, d.name AS doctor_name, s.name AS service_name,
               a.appointment_date, a.appointment_time, a.status, a.reschedule_requested,
               a.payment_amount_cents,
               COALESCE(
                   (SELECT SUM(ls.price_cents)::bigint
                    FROM appointment_service aps
                    JOIN service ls ON ls.service_id = aps.service_id
                    WHERE aps.appointment_id = a.appointment_id),
                   s.price_cents::bigint
               ) AS services_price_cents,
               a.created_at, a.updated_at, a.completed_at
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        JOIN doctor d ON d.doctor_id = a.doctor_id
        JOIN service s ON s.service_id = a.service_id
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let patients: Vec<(Option<NaiveDate>, Option<String>)> =
        sqlx::query_as("SELECT date_of_birth, gender FROM patient")
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::db)?;

    let doctors: Vec<(Uuid, String)> = sqlx::query_as("SELECT doctor_id, name FROM doctor ORDER BY name ASC")
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    let offset = state.clinic_utc_offset_minutes;
    Ok(ReportInput {
        appointments: rows.into_iter().map(|r| r.into_report(offset)).collect(),
        patients: patients
            .into_iter()
            .map(|(date_of_birth, gender)| ReportPatient { date_of_birth, gender })
            .collect(),
        doctors: doctors
            .into_iter()
            .map(|(doctor_id, name)| ReportDoctor { doctor_id, name })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub range: ReportRange,
}

pub async fn get_summary(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<ApiOk<ReportSummary>>, ApiError> {
    auth.ensure_clinic()?;

    let input = load_input(&state).await?;
    let summary = reports::report_summary(
        &input.appointments,
        &input.patients,
        &input.doctors,
        q.range,
        state.today(),
    );
    Ok(Json(ApiOk { data: summary }))
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    pub period: DashboardPeriod,
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<DashboardQuery>,
) -> Result<Json<ApiOk<Dashboard>>, ApiError> {
    auth.ensure_clinic()?;

    let input = load_input(&state).await?;
    let data = reports::dashboard(
        &input.appointments,
        &input.patients,
        &input.doctors,
        q.period,
        state.today(),
    );
    Ok(Json(ApiOk { data }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_date_crosses_midnight() {
        let ts = DateTime::parse_from_rfc3339("2025-03-01T20:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(local_date(ts, 0), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(local_date(ts, 8 * 60), NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
        assert_eq!(local_date(ts, -21 * 60), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn test_query_defaults() {
        let q: SummaryQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.range, ReportRange::Month);
        let q: DashboardQuery = serde_json::from_str(r#"{"period":"week"}"#).unwrap();
        assert_eq!(q.period, DashboardPeriod::Week);
    }
}
