// src/routes/availability_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    booking,
    error::ApiError,
    models::{ApiOk, AppState},
    scheduling::{self, ClinicDay, DayOfWeek, DoctorDay, SlotView},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/availability", get(get_availability))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub doctor_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    /// Appointment being rescheduled; its own slot counts as free.
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityData {
    pub date: NaiveDate,
    pub day: DayOfWeek,
    pub is_open: bool,
    pub duration_min: i32,
    pub slots: Vec<SlotView>,
    /// First doctor with a free slot that day.
    pub doctor_id: Option<Uuid>,
}

/// No slots at all for a doctor who is not taking appointments.
fn offered_slots(
    clinic: &ClinicDay,
    doctors: &[DoctorDay],
    duration_min: i32,
    doctor_available: bool,
) -> Vec<SlotView> {
    if !doctor_available {
        return Vec::new();
    }
    scheduling::day_slots(clinic, doctors, duration_min)
}

pub async fn get_availability(
    State(state): State<AppState>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<ApiOk<AvailabilityData>>, ApiError> {
    let day = DayOfWeek::of(q.date);
    let clinic = booking::load_clinic_day(&state.db, day).await?;

    let duration_min = match q.service_id {
        Some(id) => booking::load_service(&state.db, id).await?.duration(),
        None => scheduling::DEFAULT_DURATION_MIN,
    };

    let mut offered = true;
    let doctor_ids: Vec<Uuid> = match q.doctor_id {
        Some(id) => {
            let available: bool =
                sqlx::query_scalar("SELECT available FROM doctor WHERE doctor_id = $1")
                    .bind(id)
                    .fetch_optional(&state.db)
                    .await
                    .map_err(ApiError::db)?
                    .ok_or_else(|| ApiError::not_found("doctor"))?;
            offered = available;
            vec![id]
        }
        None => sqlx::query_scalar(
            r#"
            SELECT doctor_id
            FROM doctor
            WHERE available = true
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?,
    };

    let mut doctors: Vec<DoctorDay> = Vec::with_capacity(doctor_ids.len());
    if clinic.is_open && offered {
        for id in doctor_ids {
            doctors.push(booking::load_doctor_day(&state.db, id, q.date, q.exclude_appointment_id).await?);
        }
    }

    let slots = offered_slots(&clinic, &doctors, duration_min, offered);
    let doctor_id = slots.iter().find_map(|s| s.doctor_id);

    Ok(Json(ApiOk {
        data: AvailabilityData {
            date: q.date,
            day,
            is_open: clinic.is_open,
            duration_min,
            slots,
            doctor_id,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_doctor_offers_no_slots() {
        let clinic = ClinicDay::default_for(DayOfWeek::Monday);
        let doctor = DoctorDay { doctor_id: Uuid::new_v4(), blocks: None, busy: vec![] };

        assert!(offered_slots(&clinic, &[doctor.clone()], 30, false).is_empty());

        let slots = offered_slots(&clinic, &[doctor.clone()], 30, true);
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| s.doctor_id == Some(doctor.doctor_id)));
    }
}
