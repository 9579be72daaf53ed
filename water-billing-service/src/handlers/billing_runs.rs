use super::failed;
use crate::dtos::CreateBillingRunRequest;
use crate::models::Actor;
use crate::services::{BillingRunReport, BillingRunRequest};
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;
use tracing::instrument;
use validator::Validate;

/// Generate the month's invoices. Per-customer failures are reported in the
/// body; the request itself only fails on invalid input or storage errors.
#[instrument(skip(state, actor, payload), fields(usage_month = %payload.usage_month, operator = %actor.operator_id))]
pub async fn create_billing_run(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateBillingRunRequest>,
) -> Result<Json<BillingRunReport>, AppError> {
    payload.validate()?;
    let request = BillingRunRequest::try_from(payload).map_err(failed("billing_run"))?;
    let report = state
        .billing_run
        .run(request, &actor)
        .await
        .map_err(failed("billing_run"))?;
    Ok(Json(report))
}
