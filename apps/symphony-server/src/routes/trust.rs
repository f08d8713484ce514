//! Trust metrics, suggestions and the user-initiated level change.
//! All trust endpoints require auth.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use symphony_core::types::TrustMetrics;

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_metrics(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<TrustMetrics>, ApiError> {
    let scope = auth.require()?;
    Ok(Json(
        state
            .service
            .trust()
            .get_metrics(scope.app_id(), scope.user_id()),
    ))
}

pub async fn get_suggestion(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = auth.require()?;
    let suggestion = state
        .service
        .trust()
        .suggestion(scope.app_id(), scope.user_id());
    Ok(Json(json!({ "suggestion": suggestion })))
}

#[derive(Debug, Deserialize)]
pub struct TrustLevelUpdate {
    trust_level: u8,
}

pub async fn put_level(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(update): Json<TrustLevelUpdate>,
) -> Result<Json<TrustMetrics>, ApiError> {
    let scope = auth.require()?;
    let metrics = state
        .service
        .trust()
        .set_level(scope.app_id(), scope.user_id(), update.trust_level)
        .map_err(ApiError::BadRequest)?;
    Ok(Json(metrics))
}
