//! Operator identity extractor.
//!
//! Every mutating endpoint takes an [`Actor`] built from `X-Operator-ID`
//! (required) and `X-Operator-Role` (`admin` or `operator`, default
//! `operator`). The identity flows into the core call explicitly.

use crate::models::{Actor, Role};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const OPERATOR_ID_HEADER: &str = "X-Operator-ID";
pub const OPERATOR_ROLE_HEADER: &str = "X-Operator-Role";

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let operator_id = parts
            .headers
            .get(OPERATOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", OPERATOR_ID_HEADER))
            })?;

        let role = match parts
            .headers
            .get(OPERATOR_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(raw) => raw
                .trim()
                .to_ascii_lowercase()
                .parse::<Role>()
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.to_string())))?,
            None => Role::Operator,
        };

        tracing::Span::current().record("operator_id", operator_id);

        Ok(Actor::new(operator_id, role))
    }
}

/// Reject non-admin operators.
pub fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(anyhow::anyhow!(
            "Operator {} lacks the admin role",
            actor.operator_id
        )))
    }
}
