// src/booking.rs
//
// Loads what the scheduling rules need from Postgres: the clinic's hours for
// a weekday, a doctor's blocks and bookings on a date, and service durations.

use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::scheduling::{self, Busy, ClinicDay, DayOfWeek, DoctorDay, TimeBlock};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceBrief {
    pub service_id: Uuid,
    pub name: String,
    pub duration_min: Option<i32>,
    pub price_cents: i32,
    pub active: bool,
}

impl ServiceBrief {
    pub fn duration(&self) -> i32 {
        scheduling::service_duration(self.duration_min, &self.name)
    }
}

pub async fn load_service(db: &PgPool, service_id: Uuid) -> Result<ServiceBrief, ApiError> {
    sqlx::query_as::<_, ServiceBrief>(
        r#"
        SELECT service_id, name, duration_min, price_cents, active
        FROM service
        WHERE service_id = $1
        "#,
    )
    .bind(service_id)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("service"))
}

/// Stored hours for `day`, or the default week when no row exists.
pub async fn load_clinic_day(db: &PgPool, day: DayOfWeek) -> Result<ClinicDay, ApiError> {
    let row = sqlx::query_as::<_, ClinicDay>(
        r#"
        SELECT day_of_week, is_open, start_time, end_time, break_start_time, break_end_time
        FROM clinic_schedule
        WHERE day_of_week = $1
        "#,
    )
    .bind(day)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)?;

    Ok(row.unwrap_or_else(|| ClinicDay::default_for(day)))
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    day_of_week: DayOfWeek,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

#[derive(sqlx::FromRow)]
struct BusyRow {
    appointment_time: NaiveTime,
    service_name: String,
    duration_min: Option<i32>,
}

/// Working blocks and non-cancelled bookings of one doctor on `date`.
/// `exclude` leaves out the appointment being moved.
pub async fn load_doctor_day(
    db: &PgPool,
    doctor_id: Uuid,
    date: NaiveDate,
    exclude: Option<Uuid>,
) -> Result<DoctorDay, ApiError> {
    let blocks: Vec<BlockRow> = sqlx::query_as::<_, BlockRow>(
        r#"
        SELECT day_of_week, start_time, end_time
        FROM doctor_schedule
        WHERE doctor_id = $1
        ORDER BY day_of_week, start_time
        "#,
    )
    .bind(doctor_id)
    .fetch_all(db)
    .await
    .map_err(ApiError::db)?;

    let day = DayOfWeek::of(date);
    let blocks = if blocks.is_empty() {
        None
    } else {
        Some(
            blocks
                .into_iter()
                .filter(|b| b.day_of_week == day)
                .map(|b| TimeBlock { start: b.start_time, end: b.end_time })
                .collect(),
        )
    };

    let busy: Vec<BusyRow> = sqlx::query_as::<_, BusyRow>(
        r#"
        SELECT a.appointment_time, s.name AS service_name, s.duration_min
        FROM appointment a
        JOIN service s ON s.service_id = a.service_id
        WHERE a.doctor_id = $1
          AND a.appointment_date = $2
          AND a.status <> 3
          AND ($3::uuid IS NULL OR a.appointment_id <> $3)
        "#,
    )
    .bind(doctor_id)
    .bind(date)
    .bind(exclude)
    .fetch_all(db)
    .await
    .map_err(ApiError::db)?;

    Ok(DoctorDay {
        doctor_id,
        blocks,
        busy: busy
            .into_iter()
            .map(|b| Busy {
                start: b.appointment_time,
                duration_min: scheduling::service_duration(b.duration_min, &b.service_name),
            })
            .collect(),
    })
}

/// Rejects a booking that the clinic hours, the doctor's blocks or an
/// existing appointment rule out.
pub async fn ensure_bookable(
    db: &PgPool,
    doctor_id: Uuid,
    date: NaiveDate,
    time: NaiveTime,
    duration_min: i32,
    exclude: Option<Uuid>,
) -> Result<(), ApiError> {
    let available: bool = sqlx::query_scalar(r#"SELECT available FROM doctor WHERE doctor_id = $1"#)
        .bind(doctor_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("doctor"))?;
    if !available {
        return Err(ApiError::BadRequest(
            "DOCTOR_UNAVAILABLE",
            "the selected doctor is not taking appointments".into(),
        ));
    }

    let clinic = load_clinic_day(db, DayOfWeek::of(date)).await?;
    let doctor = load_doctor_day(db, doctor_id, date, exclude).await?;
    scheduling::check_slot(&clinic, &doctor, time, duration_min)?;
    Ok(())
}
