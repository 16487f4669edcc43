mod appointment_flow;
mod audit;
mod auth;
mod booking;
mod config;
mod middleware;
mod notify;
mod reports;
mod scheduling;

mod db;
mod error;
mod models;
mod routes;

use crate::{config::Config, models::AppState};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::{header, HeaderName};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg).await?;

    if cfg.expose_reset_token {
        tracing::warn!("EXPOSE_RESET_TOKEN is on: password reset tokens are returned in responses");
    }
    if cfg.cron_api_key.is_none() {
        tracing::warn!("CRON_API_KEY is unset: the reminder job endpoint is open");
    }

    let state = AppState::new(pool, &cfg);

    // Browser front end calls the API cross-origin; the reminder job sends x-api-key.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-api-key"),
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
