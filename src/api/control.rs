//! Manual battery overrides. Each one writes the floor register immediately
//! and holds only until the next execute tick re-applies the schedule.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::error::ApiError;
use super::AppState;

pub async fn charge(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .driver
        .charge()
        .await
        .map_err(|e| ApiError::Inverter(format!("{e:#}")))?;
    info!(target = result.target_soc, "manual charge override");
    Ok(Json(result))
}

pub async fn discharge(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .driver
        .discharge()
        .await
        .map_err(|e| ApiError::Inverter(format!("{e:#}")))?;
    info!(target = result.target_soc, "manual discharge override");
    Ok(Json(result))
}

pub async fn idle(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .driver
        .idle()
        .await
        .map_err(|e| ApiError::Inverter(format!("{e:#}")))?;
    info!(target = result.target_soc, "manual idle override");
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct PeakShavingRequest {
    pub kw: f64,
}

pub async fn peak_shaving(
    State(state): State<AppState>,
    Json(req): Json<PeakShavingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !(0.0..=100.0).contains(&req.kw) {
        return Err(ApiError::BadRequest(format!("kw out of range: {}", req.kw)));
    }
    state
        .driver
        .set_peak_shaving_target(req.kw)
        .await
        .map_err(|e| ApiError::Inverter(format!("{e:#}")))?;
    info!(kw = req.kw, "peak shaving target set");
    Ok(Json(json!({ "kw": req.kw })))
}
