//! Water rate administration and resolution. Writes require the admin role.

use super::failed;
use crate::dtos::{CreateWaterRateRequest, ResolveRateParams};
use crate::middleware::require_admin;
use crate::models::{Actor, WaterRate};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn create_rate(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateWaterRateRequest>,
) -> Result<(StatusCode, Json<WaterRate>), AppError> {
    require_admin(&actor)?;
    payload.validate()?;
    let rate = state
        .rates
        .create_rate(payload.into(), &actor)
        .await
        .map_err(failed("create_rate"))?;
    Ok((StatusCode::CREATED, Json(rate)))
}

#[instrument(skip(state))]
pub async fn rate_history(
    State(state): State<AppState>,
    Path(subscription_type_id): Path<Uuid>,
) -> Result<Json<Vec<WaterRate>>, AppError> {
    let rates = state
        .rates
        .rate_history(subscription_type_id)
        .await
        .map_err(failed("rate_history"))?;
    Ok(Json(rates))
}

#[instrument(skip(state))]
pub async fn resolve_rate(
    State(state): State<AppState>,
    Query(params): Query<ResolveRateParams>,
) -> Result<Json<WaterRate>, AppError> {
    let as_of = params.date.unwrap_or_else(|| Utc::now().date_naive());
    let rate = state
        .rates
        .resolve(params.subscription_type_id, as_of, params.category_id)
        .await
        .map_err(failed("resolve_rate"))?;
    Ok(Json(rate))
}

#[instrument(skip(state, actor), fields(operator = %actor.operator_id))]
pub async fn activate_rate(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<WaterRate>, AppError> {
    require_admin(&actor)?;
    let rate = state
        .rates
        .activate_rate(id, &actor)
        .await
        .map_err(failed("activate_rate"))?;
    Ok(Json(rate))
}

#[instrument(skip(state, actor), fields(operator = %actor.operator_id))]
pub async fn deactivate_rate(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<WaterRate>, AppError> {
    require_admin(&actor)?;
    let rate = state
        .rates
        .deactivate_rate(id, &actor)
        .await
        .map_err(failed("deactivate_rate"))?;
    Ok(Json(rate))
}
