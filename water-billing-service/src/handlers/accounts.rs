//! Subscription types and customers.

use super::failed;
use crate::dtos::{
    CreateCustomerRequest, CreateSubscriptionTypeRequest, CustomerStatusRequest, InvoiceResponse,
};
use crate::middleware::require_admin;
use crate::models::{Actor, Customer, CustomerStatus, SubscriptionType, WaterUsage};
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

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn create_subscription_type(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateSubscriptionTypeRequest>,
) -> Result<(StatusCode, Json<SubscriptionType>), AppError> {
    payload.validate()?;
    let subscription = state
        .accounts
        .create_subscription_type(payload.into(), &actor)
        .await
        .map_err(failed("create_subscription_type"))?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

#[instrument(skip(state))]
pub async fn get_subscription_type(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionType>, AppError> {
    let subscription = state
        .accounts
        .get_subscription_type(id)
        .await
        .map_err(failed("get_subscription_type"))?;
    Ok(Json(subscription))
}

#[instrument(skip(state, actor), fields(operator = %actor.operator_id))]
pub async fn deactivate_subscription_type(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionType>, AppError> {
    require_admin(&actor)?;
    let subscription = state
        .accounts
        .deactivate_subscription_type(id, &actor)
        .await
        .map_err(failed("deactivate_subscription_type"))?;
    Ok(Json(subscription))
}

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn create_customer(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    payload.validate()?;
    let customer = state
        .accounts
        .register_customer(payload.into(), &actor)
        .await
        .map_err(failed("register_customer"))?;
    Ok((StatusCode::CREATED, Json(customer)))
}

#[instrument(skip(state))]
pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, AppError> {
    let customer = state
        .accounts
        .get_customer(id)
        .await
        .map_err(failed("get_customer"))?;
    Ok(Json(customer))
}

#[instrument(skip(state, actor), fields(operator = %actor.operator_id))]
pub async fn activate_customer(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, AppError> {
    change_customer_status(state, actor, id, CustomerStatus::Active, None).await
}

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn deactivate_customer(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    payload: Option<Json<CustomerStatusRequest>>,
) -> Result<Json<Customer>, AppError> {
    change_customer_status(state, actor, id, CustomerStatus::Inactive, payload).await
}

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn suspend_customer(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    payload: Option<Json<CustomerStatusRequest>>,
) -> Result<Json<Customer>, AppError> {
    change_customer_status(state, actor, id, CustomerStatus::Suspended, payload).await
}

async fn change_customer_status(
    state: AppState,
    actor: Actor,
    id: Uuid,
    status: CustomerStatus,
    payload: Option<Json<CustomerStatusRequest>>,
) -> Result<Json<Customer>, AppError> {
    require_admin(&actor)?;
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    request.validate()?;
    let customer = state
        .accounts
        .set_customer_status(id, status, request.reason, &actor)
        .await
        .map_err(failed("set_customer_status"))?;
    Ok(Json(customer))
}

/// Readings, newest first.
#[instrument(skip(state))]
pub async fn customer_usages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<WaterUsage>>, AppError> {
    let usages = state
        .usage
        .usage_history(id)
        .await
        .map_err(failed("usage_history"))?;
    Ok(Json(usages))
}

#[instrument(skip(state))]
pub async fn customer_outstanding(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let invoices = state
        .ledger
        .outstanding_invoices(Some(id))
        .await
        .map_err(failed("outstanding_invoices"))?;
    Ok(Json(invoices.into_iter().map(Into::into).collect()))
}
