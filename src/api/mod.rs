//! Dashboard HTTP surface.
//!
//! Read endpoints over the store, a health check driven by the pipeline
//! ledger, and manual battery overrides that hold until the next execute
//! tick. Everything except `/health` sits behind basic auth when it is
//! configured.

pub mod auth;
pub mod control;
pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::inverter::InverterDriver;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<Store>,
    pub driver: Arc<dyn InverterDriver>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/forecast", get(handlers::get_forecast))
        .route("/api/solar", get(handlers::get_solar))
        .route("/api/prices", get(handlers::get_prices))
        .route("/battery/schedule", get(handlers::get_schedule))
        .route("/battery/history", get(handlers::get_history))
        .route("/battery/control/charge", post(control::charge))
        .route("/battery/control/discharge", post(control::discharge))
        .route("/battery/control/idle", post(control::idle))
        .route("/battery/control/peak-shaving", post(control::peak_shaving))
        .layer(middleware::from_fn_with_state(state.clone(), auth::basic_auth));

    Router::new()
        .route("/health", get(handlers::get_health))
        .merge(protected)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
