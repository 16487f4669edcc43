// src/routes/appointment_routes.rs

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::{
    appointment_flow::{self, NoticeContext, Snapshot, Step},
    audit::{self, Actor, AuditAction},
    booking,
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{
        clean_opt, deserialize_double_option, normalize_email, require_text, ApiOk, AppState,
        AppointmentStatus, OkData,
    },
    notify, reports,
    scheduling,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/public", get(list_public))
        .route("/appointments/guest", post(create_guest_appointment))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).patch(patch_appointment).delete(delete_appointment),
        )
        .route("/appointments/{appointment_id}/services", put(put_services))
        .route("/appointments/{appointment_id}/confirm", post(confirm))
        .route("/appointments/{appointment_id}/complete", post(complete))
        .route("/appointments/{appointment_id}/cancel", post(cancel))
        .route("/appointments/{appointment_id}/request_cancellation", post(request_cancellation))
        .route("/appointments/{appointment_id}/approve_cancellation", post(approve_cancellation))
        .route("/appointments/{appointment_id}/reject_cancellation", post(reject_cancellation))
        .route("/appointments/{appointment_id}/request_reschedule", post(request_reschedule))
        .route("/appointments/{appointment_id}/approve_reschedule", post(approve_reschedule))
        .route("/appointments/{appointment_id}/reject_reschedule", post(reject_reschedule))
}

/* ============================================================
   Rows and views
   ============================================================ */

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub service_id: Uuid,
    pub service_name: String,
    #[serde(skip)]
    pub service_duration_min: Option<i32>,
    #[serde(skip)]
    pub service_price_cents: i32,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub treatment: Option<String>,
    pub remarks: Option<String>,
    pub payment_amount_cents: Option<i64>,
    pub reschedule_requested: bool,
    pub reschedule_date: Option<NaiveDate>,
    pub reschedule_time: Option<NaiveTime>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const APPOINTMENT_SELECT: &str = r#"
    SELECT a.appointment_id, a.patient_id, p.full_name AS patient_name, p.email AS patient_email,
           a.doctor_id, d.name AS doctor_name,
           a.service_id, s.name AS service_name,
           s.duration_min AS service_duration_min, s.price_cents AS service_price_cents,
           a.appointment_date, a.appointment_time, a.status, a.notes, a.treatment, a.remarks,
           a.payment_amount_cents, a.reschedule_requested, a.reschedule_date, a.reschedule_time,
           a.completed_at, a.created_at, a.updated_at
    FROM appointment a
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN doctor d ON d.doctor_id = a.doctor_id
    JOIN service s ON s.service_id = a.service_id
"#;

impl AppointmentRow {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            date: self.appointment_date,
            time: self.appointment_time,
            reschedule_requested: self.reschedule_requested,
            reschedule_date: self.reschedule_date,
            reschedule_time: self.reschedule_time,
        }
    }

    fn notice_context(&self) -> NoticeContext<'_> {
        NoticeContext {
            patient_name: &self.patient_name,
            doctor_name: &self.doctor_name,
            service_name: &self.service_name,
        }
    }

    fn duration(&self) -> i32 {
        scheduling::service_duration(self.service_duration_min, &self.service_name)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceLine {
    #[serde(skip)]
    pub appointment_id: Uuid,
    pub service_id: Uuid,
    pub name: String,
    pub duration_min: Option<i32>,
    pub price_cents: i32,
}

#[derive(Debug, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: AppointmentRow,
    pub services: Vec<ServiceLine>,
    pub duration_min: i32,
    pub total_price_cents: i64,
}

/// Line prices when the appointment has service lines, the primary service price otherwise.
pub fn list_price_cents(primary_price_cents: i32, lines: &[ServiceLine]) -> i64 {
    if lines.is_empty() {
        primary_price_cents as i64
    } else {
        lines.iter().map(|l| l.price_cents as i64).sum()
    }
}

fn into_view(appointment: AppointmentRow, services: Vec<ServiceLine>) -> AppointmentView {
    AppointmentView {
        duration_min: appointment.duration(),
        total_price_cents: list_price_cents(appointment.service_price_cents, &services),
        appointment,
        services,
    }
}

async fn load_lines(
    state: &AppState,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<ServiceLine>>, ApiError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let lines: Vec<ServiceLine> = sqlx::query_as::<_, ServiceLine>(
        r#"
        SELECT aps.appointment_id, s.service_id, s.name, s.duration_min, s.price_cents
        FROM appointment_service aps
        JOIN service s ON s.service_id = aps.service_id
        WHERE aps.appointment_id = ANY($1)
        ORDER BY aps.appointment_id, aps.position
        "#,
    )
    .bind(ids)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let mut by_id: HashMap<Uuid, Vec<ServiceLine>> = HashMap::new();
    for line in lines {
        by_id.entry(line.appointment_id).or_default().push(line);
    }
    Ok(by_id)
}

async fn attach_lines(state: &AppState, rows: Vec<AppointmentRow>) -> Result<Vec<AppointmentView>, ApiError> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.appointment_id).collect();
    let mut lines = load_lines(state, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|r| {
            let services = lines.remove(&r.appointment_id).unwrap_or_default();
            into_view(r, services)
        })
        .collect())
}

async fn load_row(state: &AppState, appointment_id: Uuid) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE a.appointment_id = $1"))
        .bind(appointment_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("appointment"))
}

async fn load_view(state: &AppState, appointment_id: Uuid) -> Result<AppointmentView, ApiError> {
    let row = load_row(state, appointment_id).await?;
    let mut views = attach_lines(state, vec![row]).await?;
    views.pop().ok_or_else(|| ApiError::not_found("appointment"))
}

/* ============================================================
   GET /appointments
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListPeriod {
    Today,
    Week,
    Month,
}

/// Calendar bounds containing `today`; weeks run Monday to Sunday.
pub fn period_bounds(period: ListPeriod, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match period {
        ListPeriod::Today => (today, today),
        ListPeriod::Week => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            (monday, monday + Duration::days(6))
        }
        ListPeriod::Month => (
            reports::first_of_month(today.year(), today.month()),
            reports::last_of_month(today.year(), today.month()),
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub period: Option<ListPeriod>,
    /// Patient name contains.
    pub search: Option<String>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentView>>>, ApiError> {
    let patient_id = if auth.is_clinic() {
        q.patient_id
    } else {
        Some(auth.own_patient_id()?)
    };

    let (mut from, mut to) = (q.from, q.to);
    if let Some(period) = q.period {
        let (start, end) = period_bounds(period, state.today());
        from = Some(start);
        to = Some(end);
    }
    if let Some(date) = q.date {
        from = Some(date);
        to = Some(date);
    }

    let search = clean_opt(q.search.as_deref()).map(|s| format!("%{s}%"));

    let rows: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        {APPOINTMENT_SELECT}
        WHERE ($1::uuid IS NULL OR a.patient_id = $1)
          AND ($2::uuid IS NULL OR a.doctor_id = $2)
          AND ($3::uuid IS NULL OR a.service_id = $3
               OR EXISTS (SELECT 1 FROM appointment_service x
                          WHERE x.appointment_id = a.appointment_id AND x.service_id = $3))
          AND ($4::smallint IS NULL OR a.status = $4)
          AND ($5::date IS NULL OR a.appointment_date >= $5)
          AND ($6::date IS NULL OR a.appointment_date <= $6)
          AND ($7::text IS NULL OR p.full_name ILIKE $7)
        ORDER BY a.appointment_date DESC, a.appointment_time DESC
        "#
    ))
    .bind(patient_id)
    .bind(q.doctor_id)
    .bind(q.service_id)
    .bind(q.status)
    .bind(from)
    .bind(to)
    .bind(search)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: attach_lines(&state, rows).await? }))
}

#[derive(Debug, Deserialize)]
pub struct PublicQuery {
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicSlotRow {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub status: AppointmentStatus,
    pub service_name: String,
}

/// Occupied slots, without patient details, for the booking calendar.
pub async fn list_public(
    State(state): State<AppState>,
    Query(q): Query<PublicQuery>,
) -> Result<Json<ApiOk<Vec<PublicSlotRow>>>, ApiError> {
    let rows: Vec<PublicSlotRow> = sqlx::query_as::<_, PublicSlotRow>(
        r#"
        SELECT a.appointment_id, a.doctor_id, d.name AS doctor_name,
               a.appointment_date, a.appointment_time, a.status, s.name AS service_name
        FROM appointment a
        JOIN doctor d ON d.doctor_id = a.doctor_id
        JOIN service s ON s.service_id = a.service_id
        WHERE a.status <> 3
          AND ($1::date IS NULL OR a.appointment_date = $1)
          AND ($2::uuid IS NULL OR a.doctor_id = $2)
        ORDER BY a.appointment_date ASC, a.appointment_time ASC
        "#,
    )
    .bind(q.date)
    .bind(q.doctor_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let view = load_view(&state, appointment_id).await?;
    auth.ensure_patient_access(view.appointment.patient_id)?;
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   Booking
   ============================================================ */

/// Primary service first, then the remaining lines without duplicates.
pub fn resolve_services(service_id: Option<Uuid>, services: &[Uuid]) -> Result<Vec<Uuid>, ApiError> {
    let mut out: Vec<Uuid> = Vec::with_capacity(services.len() + 1);
    for id in service_id.iter().chain(services.iter()) {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    if out.is_empty() {
        return Err(ApiError::validation("service_id or services is required"));
    }
    Ok(out)
}

/// `current` with its first line replaced by `primary`; the other lines stay.
pub fn swap_primary(current: &[Uuid], primary: Uuid) -> Vec<Uuid> {
    let mut out = vec![primary];
    for id in current.iter().skip(1) {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

async fn replace_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    appointment_id: Uuid,
    services: &[Uuid],
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM appointment_service WHERE appointment_id = $1")
        .bind(appointment_id)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::db)?;

    for (position, service_id) in services.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO appointment_service (appointment_id, service_id, position)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(appointment_id)
        .bind(service_id)
        .bind(position as i32)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::db_write)?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct BookingFields {
    pub doctor_id: Uuid,
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub services: Vec<Uuid>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub notes: Option<String>,
}

/// Who a booking is for. A new guest is inserted in the booking's transaction.
#[derive(Debug, PartialEq)]
enum BookingPatient {
    Existing(Uuid),
    NewGuest {
        full_name: String,
        email: String,
        phone: Option<String>,
    },
}

async fn book(
    state: &AppState,
    actor: &Actor,
    ip: &str,
    patient: BookingPatient,
    fields: BookingFields,
) -> Result<AppointmentView, ApiError> {
    if fields.date < state.today() {
        return Err(ApiError::validation("appointments cannot be booked in the past"));
    }

    let services = resolve_services(fields.service_id, &fields.services)?;
    let primary = booking::load_service(&state.db, services[0]).await?;
    if !primary.active {
        return Err(ApiError::validation(format!("{} is not currently offered", primary.name)));
    }

    booking::ensure_bookable(
        &state.db,
        fields.doctor_id,
        fields.date,
        fields.time,
        primary.duration(),
        None,
    )
    .await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let patient_id = match patient {
        BookingPatient::Existing(patient_id) => patient_id,
        BookingPatient::NewGuest { full_name, email, phone } => sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO patient (full_name, email, phone)
            VALUES ($1, $2, $3)
            RETURNING patient_id
            "#,
        )
        .bind(&full_name)
        .bind(&email)
        .bind(phone)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db_write)?,
    };

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment
            (patient_id, doctor_id, service_id, appointment_date, appointment_time, status,
             notes, created_by_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING appointment_id
        "#,
    )
    .bind(patient_id)
    .bind(fields.doctor_id)
    .bind(primary.service_id)
    .bind(fields.date)
    .bind(fields.time)
    .bind(AppointmentStatus::Pending)
    .bind(clean_opt(fields.notes.as_deref()))
    .bind(actor.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db_write)?;

    replace_lines(&mut tx, appointment_id, &services).await?;

    tx.commit().await.map_err(ApiError::db)?;

    let view = load_view(state, appointment_id).await?;
    let a = &view.appointment;
    tracing::info!(%appointment_id, date = %a.appointment_date, time = %a.appointment_time, "appointment booked");

    audit::record(
        &state.db,
        actor,
        AuditAction::AppointmentCreated,
        json!({
            "appointment_id": appointment_id,
            "patient": a.patient_name,
            "doctor": a.doctor_name,
            "service": a.service_name,
            "date": appointment_flow::fmt_date(a.appointment_date),
            "time": appointment_flow::fmt_time(a.appointment_time),
        }),
        ip,
    )
    .await;

    let notice = appointment_flow::creation_notice(a.notice_context(), a.appointment_date, a.appointment_time);
    notify::deliver(&state.db, a.patient_id, &[notice]).await;

    Ok(view)
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    #[serde(flatten)]
    pub booking: BookingFields,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let patient_id = if auth.is_clinic() {
        req.patient_id
            .ok_or_else(|| ApiError::validation("patient_id is required"))?
    } else {
        let own = auth.own_patient_id()?;
        if req.patient_id.is_some_and(|id| id != own) {
            return Err(ApiError::forbidden("You can only book for yourself"));
        }
        own
    };

    let view = book(
        &state,
        &Actor::from(&auth),
        &ip,
        BookingPatient::Existing(patient_id),
        req.booking,
    )
    .await?;
    Ok(Json(ApiOk { data: view }))
}

#[derive(Debug, Deserialize)]
pub struct GuestAppointmentRequest {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    #[serde(flatten)]
    pub booking: BookingFields,
}

/// Books without an account, reusing an unclaimed patient record with the same email.
pub async fn create_guest_appointment(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<GuestAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let full_name = require_text(&req.full_name, "full_name")?;
    let email = normalize_email(&req.email)?;

    let existing: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
        r#"SELECT patient_id, user_id FROM patient WHERE lower(email) = $1"#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    let actor = Actor::guest(&full_name);
    let patient = guest_patient(existing, full_name, email, clean_opt(req.phone.as_deref()))?;
    let view = book(&state, &actor, &ip, patient, req.booking).await?;
    Ok(Json(ApiOk { data: view }))
}

/// Accounts must sign in; an unclaimed record is reused, otherwise a new one is made.
fn guest_patient(
    existing: Option<(Uuid, Option<Uuid>)>,
    full_name: String,
    email: String,
    phone: Option<String>,
) -> Result<BookingPatient, ApiError> {
    match existing {
        Some((_, Some(_))) => Err(ApiError::Conflict(
            "ACCOUNT_EXISTS",
            "An account exists for this email; please sign in to book".into(),
        )),
        Some((patient_id, None)) => Ok(BookingPatient::Existing(patient_id)),
        None => Ok(BookingPatient::NewGuest { full_name, email, phone }),
    }
}

/* ============================================================
   Changes
   ============================================================ */

/// Every column a change may touch, starting from the stored values.
#[derive(Debug, Clone)]
struct Draft {
    doctor_id: Uuid,
    service_id: Uuid,
    date: NaiveDate,
    time: NaiveTime,
    status: AppointmentStatus,
    notes: Option<String>,
    treatment: Option<String>,
    remarks: Option<String>,
    payment_amount_cents: Option<i64>,
    reschedule_requested: bool,
    reschedule_date: Option<NaiveDate>,
    reschedule_time: Option<NaiveTime>,
    completed_at: Option<DateTime<Utc>>,
}

impl Draft {
    fn of(row: &AppointmentRow) -> Self {
        Draft {
            doctor_id: row.doctor_id,
            service_id: row.service_id,
            date: row.appointment_date,
            time: row.appointment_time,
            status: row.status,
            notes: row.notes.clone(),
            treatment: row.treatment.clone(),
            remarks: row.remarks.clone(),
            payment_amount_cents: row.payment_amount_cents,
            reschedule_requested: row.reschedule_requested,
            reschedule_date: row.reschedule_date,
            reschedule_time: row.reschedule_time,
            completed_at: row.completed_at,
        }
    }

    fn moves_slot(&self, row: &AppointmentRow) -> bool {
        self.doctor_id != row.doctor_id
            || self.service_id != row.service_id
            || self.date != row.appointment_date
            || self.time != row.appointment_time
    }

    fn clear_reschedule(&mut self) {
        self.reschedule_requested = false;
        self.reschedule_date = None;
        self.reschedule_time = None;
    }
}

async fn write_draft(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    appointment_id: Uuid,
    d: &Draft,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE appointment
        SET doctor_id = $1,
            service_id = $2,
            appointment_date = $3,
            appointment_time = $4,
            status = $5,
            notes = $6,
            treatment = $7,
            remarks = $8,
            payment_amount_cents = $9,
            reschedule_requested = $10,
            reschedule_date = $11,
            reschedule_time = $12,
            completed_at = $13,
            updated_at = now()
        WHERE appointment_id = $14
        "#,
    )
    .bind(d.doctor_id)
    .bind(d.service_id)
    .bind(d.date)
    .bind(d.time)
    .bind(d.status)
    .bind(&d.notes)
    .bind(&d.treatment)
    .bind(&d.remarks)
    .bind(d.payment_amount_cents)
    .bind(d.reschedule_requested)
    .bind(d.reschedule_date)
    .bind(d.reschedule_time)
    .bind(d.completed_at)
    .bind(appointment_id)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::db_write)?;
    Ok(())
}

/// Saves `draft` (and optionally new service lines), then records the audit
/// entry and sends the notifications the change calls for.
async fn apply_change(
    state: &AppState,
    auth: &AuthContext,
    ip: &str,
    before: &AppointmentRow,
    draft: Draft,
    lines: Option<Vec<Uuid>>,
) -> Result<AppointmentView, ApiError> {
    if draft.moves_slot(before) && draft.status.holds_slot() {
        let service = booking::load_service(&state.db, draft.service_id).await?;
        booking::ensure_bookable(
            &state.db,
            draft.doctor_id,
            draft.date,
            draft.time,
            service.duration(),
            Some(before.appointment_id),
        )
        .await?;
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    write_draft(&mut tx, before.appointment_id, &draft).await?;
    if let Some(lines) = &lines {
        replace_lines(&mut tx, before.appointment_id, lines).await?;
    }
    tx.commit().await.map_err(ApiError::db)?;

    let view = load_view(state, before.appointment_id).await?;
    let after = &view.appointment;

    let action = if lines.is_some() && before.snapshot() == after.snapshot() {
        AuditAction::AppointmentUpdated
    } else {
        appointment_flow::audit_action(&before.snapshot(), &after.snapshot())
    };
    audit::record(&state.db, &Actor::from(auth), action, change_details(before, after), ip).await;

    let notices = appointment_flow::change_notices(&before.snapshot(), &after.snapshot(), after.notice_context());
    notify::deliver(&state.db, after.patient_id, &notices).await;

    Ok(view)
}

fn change_details(before: &AppointmentRow, after: &AppointmentRow) -> JsonValue {
    let mut details = json!({
        "appointment_id": after.appointment_id,
        "patient": after.patient_name,
        "doctor": after.doctor_name,
        "service": after.service_name,
        "date": appointment_flow::fmt_date(after.appointment_date),
        "time": appointment_flow::fmt_time(after.appointment_time),
    });
    if before.status != after.status {
        details["status_from"] = json!(before.status.as_str());
        details["status_to"] = json!(after.status.as_str());
    }
    if before.appointment_date != after.appointment_date || before.appointment_time != after.appointment_time {
        details["previous_date"] = json!(appointment_flow::fmt_date(before.appointment_date));
        details["previous_time"] = json!(appointment_flow::fmt_time(before.appointment_time));
    }
    if after.reschedule_requested {
        details["requested_date"] = json!(after.reschedule_date.map(appointment_flow::fmt_date));
        details["requested_time"] = json!(after.reschedule_time.map(appointment_flow::fmt_time));
    }
    details
}

#[derive(Debug, Deserialize)]
pub struct PatchAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub doctor_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub services: Option<Vec<Uuid>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub treatment: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub remarks: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub payment_amount_cents: Option<Option<i64>>,
    pub reschedule_requested: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub reschedule_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub reschedule_time: Option<Option<NaiveTime>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

/// Staff edit of any field. Status moves are not checked against the
/// lifecycle here; the step endpoints do that.
pub async fn patch_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PatchAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    auth.ensure_clinic()?;

    let before = load_row(&state, appointment_id).await?;
    let mut d = Draft::of(&before);

    let lines = match (req.service_id, &req.services) {
        (None, None) => None,
        (Some(primary), None) => {
            let current: Vec<Uuid> = load_lines(&state, &[appointment_id])
                .await?
                .remove(&appointment_id)
                .unwrap_or_default()
                .iter()
                .map(|l| l.service_id)
                .collect();
            Some(swap_primary(&current, primary))
        }
        (primary, Some(extra)) => {
            let primary = primary.or_else(|| extra.first().copied());
            Some(resolve_services(primary, extra)?)
        }
    };
    if let Some(lines) = &lines {
        d.service_id = lines[0];
    }
    d.doctor_id = req.doctor_id.unwrap_or(d.doctor_id);
    d.date = req.date.unwrap_or(d.date);
    d.time = req.time.unwrap_or(d.time);

    if d.moves_slot(&before) {
        appointment_flow::ensure_slot_editable(before.status)?;
    }

    if let Some(status) = req.status {
        d.status = status;
    }
    if let Some(v) = req.notes {
        d.notes = clean_opt(v.as_deref());
    }
    if let Some(v) = req.treatment {
        d.treatment = clean_opt(v.as_deref());
    }
    if let Some(v) = req.remarks {
        d.remarks = clean_opt(v.as_deref());
    }
    if let Some(v) = req.payment_amount_cents {
        if v.is_some_and(|c| c < 0) {
            return Err(ApiError::validation("payment_amount_cents must not be negative"));
        }
        d.payment_amount_cents = v;
    }
    if let Some(v) = req.reschedule_requested {
        d.reschedule_requested = v;
    }
    if let Some(v) = req.reschedule_date {
        d.reschedule_date = v;
    }
    if let Some(v) = req.reschedule_time {
        d.reschedule_time = v;
    }
    match req.completed_at {
        Some(v) => d.completed_at = v,
        None if d.status == AppointmentStatus::Completed && d.completed_at.is_none() => {
            d.completed_at = Some(Utc::now());
        }
        None => {}
    }

    let view = apply_change(&state, &auth, &ip, &before, d, lines).await?;
    Ok(Json(ApiOk { data: view }))
}

#[derive(Debug, Deserialize)]
pub struct PutServicesRequest {
    pub services: Vec<Uuid>,
}

pub async fn put_services(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PutServicesRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    auth.ensure_clinic()?;

    let before = load_row(&state, appointment_id).await?;
    appointment_flow::ensure_slot_editable(before.status)?;

    let lines = resolve_services(None, &req.services)?;
    let mut d = Draft::of(&before);
    d.service_id = lines[0];

    let view = apply_change(&state, &auth, &ip, &before, d, Some(lines)).await?;
    Ok(Json(ApiOk { data: view }))
}

/* ============================================================
   Lifecycle steps
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    pub payment_amount_cents: Option<i64>,
    pub treatment: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

enum StepInput {
    None,
    Complete(CompleteRequest),
    Reschedule(RescheduleRequest),
}

async fn run_step(
    state: &AppState,
    auth: &AuthContext,
    ip: &str,
    appointment_id: Uuid,
    step: Step,
    input: StepInput,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    let before = load_row(state, appointment_id).await?;

    if step.patient_allowed() {
        auth.ensure_patient_access(before.patient_id)?;
    } else {
        auth.ensure_clinic()?;
    }
    appointment_flow::check_step(step, &before.snapshot())?;

    let mut d = Draft::of(&before);
    match (step, input) {
        (Step::Confirm, _) => d.status = AppointmentStatus::Confirmed,
        (Step::Complete, input) => {
            d.status = AppointmentStatus::Completed;
            d.completed_at = Some(Utc::now());
            d.clear_reschedule();
            if let StepInput::Complete(body) = input {
                if body.payment_amount_cents.is_some_and(|c| c < 0) {
                    return Err(ApiError::validation("payment_amount_cents must not be negative"));
                }
                d.payment_amount_cents = body.payment_amount_cents.or(d.payment_amount_cents);
                d.treatment = clean_opt(body.treatment.as_deref()).or(d.treatment);
                d.remarks = clean_opt(body.remarks.as_deref()).or(d.remarks);
            }
        }
        (Step::Cancel, _) | (Step::ApproveCancellation, _) => {
            d.status = AppointmentStatus::Cancelled;
            d.clear_reschedule();
        }
        (Step::RequestCancellation, _) => d.status = AppointmentStatus::CancellationRequested,
        (Step::RejectCancellation, _) => d.status = AppointmentStatus::Confirmed,
        (Step::RequestReschedule, input) => {
            let StepInput::Reschedule(wanted) = input else {
                return Err(ApiError::validation("date and time are required"));
            };
            if wanted.date < state.today() {
                return Err(ApiError::validation("cannot reschedule into the past"));
            }
            booking::ensure_bookable(
                &state.db,
                before.doctor_id,
                wanted.date,
                wanted.time,
                before.duration(),
                Some(appointment_id),
            )
            .await?;
            d.reschedule_requested = true;
            d.reschedule_date = Some(wanted.date);
            d.reschedule_time = Some(wanted.time);
        }
        (Step::ApproveReschedule, _) => {
            let (Some(date), Some(time)) = (before.reschedule_date, before.reschedule_time) else {
                return Err(ApiError::BadRequest(
                    "INVALID_TRANSITION",
                    "the reschedule request has no target date and time".into(),
                ));
            };
            d.date = date;
            d.time = time;
            d.clear_reschedule();
        }
        (Step::RejectReschedule, _) => d.clear_reschedule(),
    }

    let view = apply_change(state, auth, ip, &before, d, None).await?;
    Ok(Json(ApiOk { data: view }))
}

pub async fn confirm(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::Confirm, StepInput::None).await
}

pub async fn complete(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::Complete, StepInput::Complete(body)).await
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::Cancel, StepInput::None).await
}

pub async fn request_cancellation(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::RequestCancellation, StepInput::None).await
}

pub async fn approve_cancellation(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::ApproveCancellation, StepInput::None).await
}

pub async fn reject_cancellation(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::RejectCancellation, StepInput::None).await
}

pub async fn request_reschedule(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
    Json(body): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::RequestReschedule, StepInput::Reschedule(body)).await
}

pub async fn approve_reschedule(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::ApproveReschedule, StepInput::None).await
}

pub async fn reject_reschedule(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentView>>, ApiError> {
    run_step(&state, &auth, &ip, id, Step::RejectReschedule, StepInput::None).await
}

/* ============================================================
   DELETE /appointments/{id}
   ============================================================ */

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let row = load_row(&state, appointment_id).await?;
    auth.ensure_patient_access(row.patient_id)?;

    sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
        .bind(appointment_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::AppointmentDeleted,
        json!({
            "appointment_id": appointment_id,
            "patient": row.patient_name,
            "doctor": row.doctor_name,
            "service": row.service_name,
            "date": appointment_flow::fmt_date(row.appointment_date),
            "time": appointment_flow::fmt_time(row.appointment_time),
            "status": row.status.as_str(),
        }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_resolve_services() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(resolve_services(Some(a), &[]).unwrap(), vec![a]);
        assert_eq!(resolve_services(Some(a), &[b, a]).unwrap(), vec![a, b]);
        assert_eq!(resolve_services(None, &[b, a, b]).unwrap(), vec![b, a]);
        assert!(resolve_services(None, &[]).is_err());
    }

    #[test]
    fn test_swap_primary_keeps_extra_lines() {
        let (a, b, c, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(swap_primary(&[a, b, c], n), vec![n, b, c]);
        assert_eq!(swap_primary(&[a, b, c], b), vec![b, c]);
        assert_eq!(swap_primary(&[a], n), vec![n]);
        assert_eq!(swap_primary(&[], n), vec![n]);
    }

    #[test]
    fn test_guest_patient_defers_insert() {
        let known = Uuid::new_v4();
        let patient = |existing| {
            guest_patient(existing, "Ana Reyes".into(), "ana@x.com".into(), None)
        };

        assert_eq!(patient(Some((known, None))).unwrap(), BookingPatient::Existing(known));
        assert_eq!(
            patient(None).unwrap(),
            BookingPatient::NewGuest {
                full_name: "Ana Reyes".into(),
                email: "ana@x.com".into(),
                phone: None,
            }
        );
        assert!(matches!(
            patient(Some((known, Some(Uuid::new_v4())))),
            Err(ApiError::Conflict("ACCOUNT_EXISTS", _))
        ));
    }

    #[test]
    fn test_period_bounds() {
        // 2025-03-13 is a Thursday
        let today = d(2025, 3, 13);
        assert_eq!(period_bounds(ListPeriod::Today, today), (today, today));
        assert_eq!(period_bounds(ListPeriod::Week, today), (d(2025, 3, 10), d(2025, 3, 16)));
        assert_eq!(period_bounds(ListPeriod::Month, d(2024, 2, 10)), (d(2024, 2, 1), d(2024, 2, 29)));
    }

    #[test]
    fn test_list_price() {
        let line = |price| ServiceLine {
            appointment_id: Uuid::nil(),
            service_id: Uuid::new_v4(),
            name: "Cleaning".into(),
            duration_min: None,
            price_cents: price,
        };
        assert_eq!(list_price_cents(80_000, &[]), 80_000);
        assert_eq!(list_price_cents(80_000, &[line(50_000), line(15_000)]), 65_000);
    }

    #[test]
    fn test_create_body_flattens_booking_fields() {
        let body = r#"{
            "doctor_id": "6f1c1c8e-3a43-4a2e-9d7e-0f4b6a1e2c11",
            "services": ["0b8c7a2e-7f0e-4a47-8a55-33c8f3c6a001"],
            "date": "2025-04-01",
            "time": "10:30:00"
        }"#;
        let req: CreateAppointmentRequest = serde_json::from_str(body).unwrap();
        assert!(req.patient_id.is_none());
        assert!(req.booking.service_id.is_none());
        assert_eq!(req.booking.services.len(), 1);
        assert_eq!(req.booking.time, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
    }

    #[test]
    fn test_patch_body_parses_status() {
        let req: PatchAppointmentRequest =
            serde_json::from_str(r#"{"status":"cancellation_requested","notes":null}"#).unwrap();
        assert_eq!(req.status, Some(AppointmentStatus::CancellationRequested));
        assert_eq!(req.notes, Some(None));
        assert!(req.payment_amount_cents.is_none());
    }
}
