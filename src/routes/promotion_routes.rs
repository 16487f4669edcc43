// src/routes/promotion_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::{self, Actor, AuditAction},
    error::ApiError,
    middleware::{auth_context::AuthContext, client_ip::ClientIp},
    models::{clean_opt, deserialize_double_option, require_text, ApiOk, AppState, OkData, Role},
    notify::{self, NotificationKind},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PromotionRow {
    pub promotion_id: Uuid,
    pub title: String,
    pub description: String,
    pub discount: String,
    pub valid_until: Option<NaiveDate>,
    pub original_price: Option<String>,
    pub promo_price: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROMOTION_COLUMNS: &str = "promotion_id, title, description, discount, valid_until, \
                                 original_price, promo_price, active, created_at, updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/promotions", get(list_promotions).post(create_promotion))
        .route(
            "/promotions/{promotion_id}",
            get(get_promotion).patch(update_promotion).delete(delete_promotion),
        )
}

#[derive(Debug, Deserialize)]
pub struct PromotionQuery {
    /// Only running promotions: active and not past `valid_until`.
    pub active: Option<bool>,
}

pub async fn list_promotions(
    State(state): State<AppState>,
    Query(q): Query<PromotionQuery>,
) -> Result<Json<ApiOk<Vec<PromotionRow>>>, ApiError> {
    let running_on = q.active.unwrap_or(false).then(|| state.today());

    let rows: Vec<PromotionRow> = sqlx::query_as::<_, PromotionRow>(&format!(
        r#"
        SELECT {PROMOTION_COLUMNS}
        FROM promotion
        WHERE ($1::date IS NULL OR (active = true AND (valid_until IS NULL OR valid_until >= $1)))
        ORDER BY created_at DESC
        "#
    ))
    .bind(running_on)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

async fn load_promotion(state: &AppState, promotion_id: Uuid) -> Result<PromotionRow, ApiError> {
    sqlx::query_as::<_, PromotionRow>(&format!(
        "SELECT {PROMOTION_COLUMNS} FROM promotion WHERE promotion_id = $1"
    ))
    .bind(promotion_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("promotion"))
}

pub async fn get_promotion(
    State(state): State<AppState>,
    Path(promotion_id): Path<Uuid>,
) -> Result<Json<ApiOk<PromotionRow>>, ApiError> {
    Ok(Json(ApiOk { data: load_promotion(&state, promotion_id).await? }))
}

#[derive(Debug, Deserialize)]
pub struct CreatePromotionRequest {
    pub title: String,
    pub description: String,
    pub discount: String,
    pub valid_until: Option<NaiveDate>,
    pub original_price: Option<String>,
    pub promo_price: Option<String>,
    pub active: Option<bool>,
}

pub async fn create_promotion(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Json(req): Json<CreatePromotionRequest>,
) -> Result<Json<ApiOk<PromotionRow>>, ApiError> {
    auth.ensure_admin()?;

    let title = require_text(&req.title, "title")?;
    let description = require_text(&req.description, "description")?;
    let discount = require_text(&req.discount, "discount")?;

    let row: PromotionRow = sqlx::query_as::<_, PromotionRow>(&format!(
        r#"
        INSERT INTO promotion (title, description, discount, valid_until, original_price, promo_price, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {PROMOTION_COLUMNS}
        "#
    ))
    .bind(&title)
    .bind(&description)
    .bind(&discount)
    .bind(req.valid_until)
    .bind(clean_opt(req.original_price.as_deref()))
    .bind(clean_opt(req.promo_price.as_deref()))
    .bind(req.active.unwrap_or(true))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::PromotionCreated,
        json!({ "promotion_id": row.promotion_id, "title": title, "discount": discount }),
        &ip,
    )
    .await;

    let sent = notify::to_role(
        &state.db,
        Role::Patient,
        NotificationKind::NewPromotion,
        &format!("New promotion: {title}"),
        &notify::truncate(&description, 100),
    )
    .await;
    tracing::info!(promotion_id = %row.promotion_id, sent, "promotion announced");

    Ok(Json(ApiOk { data: row }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePromotionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub discount: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub valid_until: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub original_price: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub promo_price: Option<Option<String>>,
    pub active: Option<bool>,
}

pub async fn update_promotion(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(promotion_id): Path<Uuid>,
    Json(req): Json<UpdatePromotionRequest>,
) -> Result<Json<ApiOk<PromotionRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = load_promotion(&state, promotion_id).await?;

    let text = |v: Option<&str>, field: &str, current: &str| -> Result<String, ApiError> {
        match v {
            Some(v) => require_text(v, field),
            None => Ok(current.to_string()),
        }
    };
    let title = text(req.title.as_deref(), "title", &existing.title)?;
    let description = text(req.description.as_deref(), "description", &existing.description)?;
    let discount = text(req.discount.as_deref(), "discount", &existing.discount)?;
    let valid_until = req.valid_until.unwrap_or(existing.valid_until);
    let original_price = match req.original_price {
        Some(v) => clean_opt(v.as_deref()),
        None => existing.original_price.clone(),
    };
    let promo_price = match req.promo_price {
        Some(v) => clean_opt(v.as_deref()),
        None => existing.promo_price.clone(),
    };
    let active = req.active.unwrap_or(existing.active);

    let row: PromotionRow = sqlx::query_as::<_, PromotionRow>(&format!(
        r#"
        UPDATE promotion
        SET title = $1,
            description = $2,
            discount = $3,
            valid_until = $4,
            original_price = $5,
            promo_price = $6,
            active = $7,
            updated_at = now()
        WHERE promotion_id = $8
        RETURNING {PROMOTION_COLUMNS}
        "#
    ))
    .bind(&title)
    .bind(&description)
    .bind(&discount)
    .bind(valid_until)
    .bind(original_price)
    .bind(promo_price)
    .bind(active)
    .bind(promotion_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db_write)?;

    let mut details = json!({ "promotion_id": promotion_id, "title": title });
    if existing.active != active {
        details["active"] = json!(active);
    }
    audit::record(&state.db, &Actor::from(&auth), AuditAction::PromotionUpdated, details, &ip).await;

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_promotion(
    State(state): State<AppState>,
    auth: AuthContext,
    ClientIp(ip): ClientIp,
    Path(promotion_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;

    let existing = load_promotion(&state, promotion_id).await?;

    sqlx::query("DELETE FROM promotion WHERE promotion_id = $1")
        .bind(promotion_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    audit::record(
        &state.db,
        &Actor::from(&auth),
        AuditAction::PromotionDeleted,
        json!({ "promotion_id": promotion_id, "title": existing.title }),
        &ip,
    )
    .await;

    Ok(Json(ApiOk::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_body_distinguishes_null_from_missing() {
        let req: UpdatePromotionRequest =
            serde_json::from_str(r#"{"valid_until":null,"title":"Spring whitening"}"#).unwrap();
        assert_eq!(req.valid_until, Some(None));
        assert_eq!(req.title.as_deref(), Some("Spring whitening"));
        assert!(req.promo_price.is_none());

        let req: UpdatePromotionRequest = serde_json::from_str(r#"{"valid_until":"2025-12-31"}"#).unwrap();
        assert_eq!(req.valid_until, Some(NaiveDate::from_ymd_opt(2025, 12, 31)));
    }
}
