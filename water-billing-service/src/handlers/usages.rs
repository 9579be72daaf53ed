use super::failed;
use crate::dtos::{RecordUsageRequest, UpdateUsageRequest};
use crate::models::{Actor, RecordUsage, WaterUsage};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

#[instrument(skip(state, actor, payload), fields(customer_id = %payload.customer_id, operator = %actor.operator_id))]
pub async fn record_usage(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<RecordUsageRequest>,
) -> Result<(StatusCode, Json<WaterUsage>), AppError> {
    payload.validate()?;
    let input = RecordUsage::try_from(payload).map_err(failed("record_usage"))?;
    let usage = state
        .usage
        .record(input, &actor)
        .await
        .map_err(failed("record_usage"))?;
    Ok((StatusCode::CREATED, Json(usage)))
}

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn update_usage(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUsageRequest>,
) -> Result<Json<WaterUsage>, AppError> {
    payload.validate()?;
    let usage = state
        .usage
        .update_reading(id, payload.into(), &actor)
        .await
        .map_err(failed("update_reading"))?;
    Ok(Json(usage))
}
