use super::failed;
use crate::dtos::{
    GenerateInvoiceRequest, InvoiceResponse, ListInvoicesParams, OverdueSweepParams,
    OverdueSweepResponse, PaymentResponse, VoidRequest,
};
use crate::middleware::require_admin;
use crate::models::{Actor, ListInvoicesFilter};
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

#[instrument(skip(state, actor, payload), fields(customer_id = %payload.customer_id, usage_id = %payload.usage_id, operator = %actor.operator_id))]
pub async fn generate_invoice(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<GenerateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    let invoice = state
        .ledger
        .generate_for_usage(payload.customer_id, payload.usage_id, payload.issue_date)
        .await
        .map_err(failed("generate_invoice"))?;
    Ok((StatusCode::CREATED, Json(invoice.into())))
}

#[instrument(skip(state))]
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<ListInvoicesParams>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let filter = ListInvoicesFilter::try_from(params).map_err(failed("list_invoices"))?;
    let invoices = state
        .ledger
        .list_invoices(&filter)
        .await
        .map_err(failed("list_invoices"))?;
    Ok(Json(invoices.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state))]
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .ledger
        .get_invoice(id)
        .await
        .map_err(failed("get_invoice"))?;
    Ok(Json(invoice.into()))
}

#[instrument(skip(state))]
pub async fn invoice_payments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PaymentResponse>>, AppError> {
    let payments = state
        .ledger
        .payments_for_invoice(id)
        .await
        .map_err(failed("payments_for_invoice"))?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state, actor, payload), fields(operator = %actor.operator_id))]
pub async fn void_invoice(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<VoidRequest>,
) -> Result<Json<InvoiceResponse>, AppError> {
    require_admin(&actor)?;
    payload.validate()?;
    let invoice = state
        .ledger
        .void_invoice(id, Some(payload.reason), &actor)
        .await
        .map_err(failed("void_invoice"))?;
    Ok(Json(invoice.into()))
}

/// Run the overdue transition now instead of waiting for the sweeper.
#[instrument(skip(state, actor), fields(operator = %actor.operator_id))]
pub async fn overdue_sweep(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<OverdueSweepParams>,
) -> Result<Json<OverdueSweepResponse>, AppError> {
    require_admin(&actor)?;
    let as_of = params.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let updated = state
        .ledger
        .refresh_overdue(as_of, "manual")
        .await
        .map_err(failed("refresh_overdue"))?;
    Ok(Json(OverdueSweepResponse { as_of, updated }))
}
