use super::failed;
use crate::dtos::{date_range, OutstandingReportParams, ReportRangeParams};
use crate::models::{AgingReport, PaymentSummary, RevenueReport, UsageReport};
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use tracing::instrument;

/// Aging of outstanding invoices issued inside the range.
#[instrument(skip(state))]
pub async fn outstanding_report(
    State(state): State<AppState>,
    Query(params): Query<OutstandingReportParams>,
) -> Result<Json<AgingReport>, AppError> {
    let range = date_range(params.start_date, params.end_date).map_err(failed("aging_report"))?;
    let as_of = params.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let report = state
        .aging
        .build_aging_report(range, as_of)
        .await
        .map_err(failed("aging_report"))?;
    Ok(Json(report))
}

#[instrument(skip(state))]
pub async fn payment_summary(
    State(state): State<AppState>,
    Query(params): Query<ReportRangeParams>,
) -> Result<Json<PaymentSummary>, AppError> {
    let range = date_range(params.start_date, params.end_date).map_err(failed("payment_summary"))?;
    let summary = state
        .aging
        .payment_summary(range)
        .await
        .map_err(failed("payment_summary"))?;
    Ok(Json(summary))
}

/// Billed revenue by month and subscription type, by issue date.
#[instrument(skip(state))]
pub async fn revenue_report(
    State(state): State<AppState>,
    Query(params): Query<ReportRangeParams>,
) -> Result<Json<RevenueReport>, AppError> {
    let range = date_range(params.start_date, params.end_date).map_err(failed("revenue_report"))?;
    let report = state
        .aging
        .revenue_report(range)
        .await
        .map_err(failed("revenue_report"))?;
    Ok(Json(report))
}

/// Consumption totals, monthly trend and top readings, by usage month.
#[instrument(skip(state))]
pub async fn usage_report(
    State(state): State<AppState>,
    Query(params): Query<ReportRangeParams>,
) -> Result<Json<UsageReport>, AppError> {
    let range = date_range(params.start_date, params.end_date).map_err(failed("usage_report"))?;
    let report = state
        .aging
        .usage_report(range)
        .await
        .map_err(failed("usage_report"))?;
    Ok(Json(report))
}
