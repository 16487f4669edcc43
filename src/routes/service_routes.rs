// src/routes/service_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{clean_opt, deserialize_double_option, require_text, ApiOk, AppState, OkData},
    scheduling,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub service_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration_min: Option<i32>,
    pub price_cents: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub service: ServiceRow,
    /// Stored duration, or the estimate derived from the name.
    pub effective_duration_min: i32,
}

impl From<ServiceRow> for ServiceView {
    fn from(service: ServiceRow) -> Self {
        let effective_duration_min = scheduling::service_duration(service.duration_min, &service.name);
        ServiceView { service, effective_duration_min }
    }
}

const SERVICE_COLUMNS: &str =
    "service_id, name, description, duration_min, price_cents, active, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/{service_id}",
            get(get_service).patch(update_service).delete(delete_service),
        )
}

/// Minutes as a number, or free text such as "1 hr 30 mins".
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DurationInput {
    Minutes(i32),
    Text(String),
}

impl DurationInput {
    fn minutes(&self) -> Result<i32, ApiError> {
        let m = match self {
            DurationInput::Minutes(m) => Some(*m),
            DurationInput::Text(t) => scheduling::parse_duration_text(t),
        };
        match m {
            Some(m) if (1..=scheduling::MAX_DURATION_MIN).contains(&m) => Ok(m),
            _ => Err(ApiError::validation(format!(
                "duration must be between 1 and {} minutes",
                scheduling::MAX_DURATION_MIN
            ))),
        }
    }
}

fn validate_price(price_cents: i32) -> Result<i32, ApiError> {
    if price_cents < 0 {
        return Err(ApiError::validation("price_cents must not be negative"));
    }
    Ok(price_cents)
}

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub active: Option<bool>,
}

pub async fn list_services(
    State(state): State<AppState>,
    Query(q): Query<ServiceQuery>,
) -> Result<Json<ApiOk<Vec<ServiceView>>>, ApiError> {
    let rows: Vec<ServiceRow> = sqlx::query_as::<_, ServiceRow>(&format!(
        r#"
        SELECT {SERVICE_COLUMNS}
        FROM service
        WHERE ($1::bool IS NULL OR active = $1)
        ORDER BY name ASC
        "#
    ))
    .bind(q.active)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(ServiceView::from).collect(),
    }))
}

async fn load_service_row(state: &AppState, service_id: Uuid) -> Result<ServiceRow, ApiError> {
    sqlx::query_as::<_, ServiceRow>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM service WHERE service_id = $1"
    ))
    .bind(service_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("service"))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> Result<Json<ApiOk<ServiceView>>, ApiError> {
    Ok(Json(ApiOk {
        data: load_service_row(&state, service_id).await?.into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(alias = "duration_min")]
    pub duration: Option<DurationInput>,
    pub price_cents: i32,
    pub active: Option<bool>,
}

pub async fn create_service(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreateServiceRequest>,
) -> Result<Json<ApiOk<ServiceView>>, ApiError> {
    auth.ensure_clinic()?;

    let name = require_text(&req.name, "name")?;
    let price_cents = validate_price(req.price_cents)?;
    let duration_min = req.duration.as_ref().map(DurationInput::minutes).transpose()?;

    let row: ServiceRow = sqlx::query_as::<_, ServiceRow>(&format!(
        r#"
        INSERT INTO service (name, description, duration_min, price_cents, active)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {SERVICE_COLUMNS}
        "#
    ))
    .bind(&name)
    .bind(clean_opt(req.description.as_deref()))
    .bind(duration_min)
    .bind(price_cents)
    .bind(req.active.unwrap_or(true))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ServiceCreated,
        json!({ "service_id": row.service_id, "name": name, "price_cents": price_cents }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk { data: row.into() }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub description: Option<Option<String>>,
    /// `null` falls back to the name-based estimate.
    #[serde(default, alias = "duration_min", deserialize_with = "deserialize_double_option")]
    pub duration: Option<Option<DurationInput>>,
    pub price_cents: Option<i32>,
    pub active: Option<bool>,
}

fn status_label(active: bool) -> &'static str {
    if active { "Active" } else { "Inactive" }
}

/// Human-readable audit line for an activation toggle.
pub fn status_change_detail(before: bool, after: bool) -> Option<String> {
    (before != after).then(|| format!("Status changed: {} → {}", status_label(before), status_label(after)))
}

pub async fn update_service(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(service_id): Path<Uuid>,
    Json(req): Json<UpdateServiceRequest>,
) -> Result<Json<ApiOk<ServiceView>>, ApiError> {
    auth.ensure_clinic()?;

    let existing = load_service_row(&state, service_id).await?;

    let name = match req.name.as_deref() {
        Some(n) => require_text(n, "name")?,
        None => existing.name.clone(),
    };
    let description = match req.description {
        Some(d) => clean_opt(d.as_deref()),
        None => existing.description.clone(),
    };
    let duration_min = match &req.duration {
        Some(Some(d)) => Some(d.minutes()?),
        Some(None) => None,
        None => existing.duration_min,
    };
    let price_cents = match req.price_cents {
        Some(p) => validate_price(p)?,
        None => existing.price_cents,
    };
    let active = req.active.unwrap_or(existing.active);

    let row: ServiceRow = sqlx::query_as::<_, ServiceRow>(&format!(
        r#"
        UPDATE service
        SET name = $1,
            description = $2,
            duration_min = $3,
            price_cents = $4,
            active = $5,
            updated_at = now()
        WHERE service_id = $6
        RETURNING {SERVICE_COLUMNS}
        "#
    ))
    .bind(&name)
    .bind(description)
    .bind(duration_min)
    .bind(price_cents)
    .bind(active)
    .bind(service_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    let mut details = json!({ "service_id": service_id, "name": name });
    if let Some(change) = status_change_detail(existing.active, active) {
        details["status_change"] = json!(change);
    }
    if existing.price_cents != price_cents {
        details["price_change"] = json!({ "from": existing.price_cents, "to": price_cents });
    }
    audit::record(&state.db, &Actor::from(&auth), AuditAction::ServiceUpdated, details, &ip).await;

    Ok(Json(ApiOk { data: row.into() }))
}

pub async fn delete_service(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(service_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;

    let service = load_service_row(&state, service_id).await?;

    let in_use: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT a.appointment_id)
        FROM appointment a
        LEFT JOIN appointment_service aps ON aps.appointment_id = a.appointment_id
        WHERE (a.service_id = $1 OR aps.service_id = $1)
          AND a.status NOT IN (2, 3)
        "#,
    )
    .bind(service_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if in_use > 0 {
        return Err(ApiError::BadRequest(
            "SERVICE_IN_USE",
            format!("Service is used by {in_use} active appointment(s); deactivate it instead"),
        ));
    }

    sqlx::query("DELETE FROM service WHERE service_id = $1")
        .bind(service_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::ServiceDeleted,
        json!({ "service_id": service_id, "name": service.name }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_input_shapes() {
        let n: DurationInput = serde_json::from_str("45").unwrap();
        assert_eq!(n.minutes().unwrap(), 45);
        let t: DurationInput = serde_json::from_str(r#""1 hr 30 mins""#).unwrap();
        assert_eq!(t.minutes().unwrap(), 90);
        assert!(DurationInput::Minutes(0).minutes().is_err());
        assert!(DurationInput::Text("soon".into()).minutes().is_err());
    }

    #[test]
    fn test_duration_upper_bound() {
        assert_eq!(DurationInput::Minutes(1440).minutes().unwrap(), 1440);
        assert!(DurationInput::Minutes(1441).minutes().is_err());
        assert!(DurationInput::Minutes(2_147_483_000).minutes().is_err());
        assert!(DurationInput::Text("99999999999 hours".into()).minutes().is_err());
    }

    #[test]
    fn test_duration_min_field_name() {
        let req: CreateServiceRequest =
            serde_json::from_str(r#"{"name":"Filling","price_cents":100,"duration_min":50}"#).unwrap();
        assert_eq!(req.duration, Some(DurationInput::Minutes(50)));

        let req: UpdateServiceRequest = serde_json::from_str(r#"{"duration_min":50}"#).unwrap();
        assert_eq!(req.duration, Some(Some(DurationInput::Minutes(50))));
        let req: UpdateServiceRequest = serde_json::from_str(r#"{"duration_min":null}"#).unwrap();
        assert_eq!(req.duration, Some(None));
    }

    #[test]
    fn test_status_change_detail() {
        assert_eq!(
            status_change_detail(true, false).as_deref(),
            Some("Status changed: Active → Inactive")
        );
        assert_eq!(status_change_detail(true, true), None);
    }

    #[test]
    fn test_patch_duration_null_clears() {
        let req: UpdateServiceRequest = serde_json::from_str(r#"{"duration":null}"#).unwrap();
        assert_eq!(req.duration, Some(None));
        let req: UpdateServiceRequest = serde_json::from_str(r#"{"duration":"2 hours"}"#).unwrap();
        assert_eq!(req.duration, Some(Some(DurationInput::Text("2 hours".into()))));
    }
}
