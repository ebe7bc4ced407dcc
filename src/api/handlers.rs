//! Read endpoints over the store and the ledger-driven health check.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::error::ApiError;
use super::AppState;
use crate::clock;
use crate::pipeline;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl RangeQuery {
    /// Resolve to a concrete window, defaulting to the current local day.
    fn resolve(&self, state: &AppState) -> Result<(String, String), ApiError> {
        let now = clock::now_local(state.cfg.location.tz());
        let today = clock::date_of(&now);
        let from = self.from.clone().unwrap_or_else(|| format!("{today}T00:00"));
        let to = match &self.to {
            Some(to) => to.clone(),
            None => clock::shift_days(&from, 1)
                .map_err(|e| ApiError::BadRequest(format!("{e:#}")))?,
        };
        clock::parse(&from).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
        clock::parse(&to).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
        Ok((from, to))
    }
}

/// GET /forecast — the learning view of the coming hours.
pub async fn get_forecast(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let now = clock::now_local(state.cfg.location.tz());
    let from = clock::hour_start(&now).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    let to = clock::shift_hours(&from, state.cfg.forecast.horizon_hours as i64)
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    let readings = state.store.get_readings_for_range(&from, &to)?;
    Ok(Json(json!({ "from": from, "to": to, "hours": readings })))
}

/// GET /api/solar?from&to — raw solar readings.
pub async fn get_solar(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (from, to) = range.resolve(&state)?;
    let readings = state.store.get_readings_for_range(&from, &to)?;
    Ok(Json(readings))
}

/// GET /api/prices?from&to.
pub async fn get_prices(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (from, to) = range.resolve(&state)?;
    let prices = state.store.get_prices_for_range(&from, &to)?;
    Ok(Json(prices))
}

/// GET /battery/schedule — the window from the active slot forward.
pub async fn get_schedule(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let now = clock::now_local(state.cfg.location.tz());
    let from = clock::slot_start(&now).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    let to = clock::shift_hours(&from, 24).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    let slots = state.store.get_schedule_for_range(&from, &to)?;
    Ok(Json(slots))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub hours: Option<i64>,
}

/// GET /battery/history?hours=N — what the battery actually did: past
/// schedule slots joined with the energy snapshots of the same window.
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 7);
    let now = clock::now_local(state.cfg.location.tz());
    let to = clock::slot_start(&now).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    let from = clock::shift_hours(&to, -hours).map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;

    let slots = state.store.get_schedule_for_range(&from, &to)?;
    let snapshots = state.store.get_snapshots_for_range(&from, &to)?;
    Ok(Json(json!({
        "from": from,
        "to": to,
        "schedule": slots,
        "snapshots": snapshots,
    })))
}

/// GET /health — 200 while every pipeline is fresh and clean, 503 otherwise.
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let now = clock::now_local(state.cfg.location.tz());
    match pipeline::health_report(&state.store, &state.cfg, &now) {
        Ok(report) => {
            let status = if report.healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(json!(report))).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "healthy": false, "error": format!("{e:#}") })),
        )
            .into_response(),
    }
}
