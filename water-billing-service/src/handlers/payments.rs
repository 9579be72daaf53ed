use super::failed;
use crate::dtos::{CreatePaymentRequest, PaymentResponse, PaymentResultResponse, VoidRequest};
use crate::middleware::require_admin;
use crate::models::{Actor, CreatePayment};
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

/// Record a payment; responds with the payment and the updated invoice.
#[instrument(skip(state, actor, payload), fields(invoice_id = %payload.invoice_id, amount = payload.amount, operator = %actor.operator_id))]
pub async fn create_payment(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResultResponse>), AppError> {
    payload.validate()?;
    let input = CreatePayment::try_from(payload).map_err(failed("apply_payment"))?;
    let result = state
        .ledger
        .apply_payment(input, &actor)
        .await
        .map_err(failed("apply_payment"))?;
    Ok((StatusCode::CREATED, Json(result.into())))
}

#[instrument(skip(state))]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state
        .ledger
        .get_payment(id)
        .await
        .map_err(failed("get_payment"))?;
    Ok(Json(payment.into()))
}

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn void_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<VoidRequest>,
) -> Result<Json<PaymentResultResponse>, AppError> {
    require_admin(&actor)?;
    payload.validate()?;
    let result = state
        .ledger
        .void_payment(id, Some(payload.reason), &actor)
        .await
        .map_err(failed("void_payment"))?;
    Ok(Json(result.into()))
}
