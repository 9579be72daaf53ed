//! Effective-dated volumetric tariffs.

use super::Money;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One version of the price per m³ for a subscription type (and optional
/// category). Rates are append-only; retiring a version sets `active = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterRate {
    pub rate_id: Uuid,
    pub subscription_type_id: Uuid,
    pub category_id: Option<Uuid>,
    pub amount_per_m3: Money,
    pub effective_date: NaiveDate,
    pub active: bool,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl WaterRate {
    /// True when both rates compete for the same lookups on the same date,
    /// which would make "latest effective date wins" ambiguous.
    pub fn is_ambiguous_with(&self, other: &WaterRate) -> bool {
        self.rate_id != other.rate_id
            && self.active
            && other.active
            && self.subscription_type_id == other.subscription_type_id
            && self.category_id == other.category_id
            && self.effective_date == other.effective_date
    }

    /// Whether this rate is a candidate for `(category, as_of)`.
    pub fn applies_to(&self, category_id: Option<Uuid>, as_of: NaiveDate) -> bool {
        self.active && self.category_id == category_id && self.effective_date <= as_of
    }
}

/// Input for creating a rate version.
#[derive(Debug, Clone)]
pub struct CreateWaterRate {
    pub subscription_type_id: Uuid,
    pub category_id: Option<Uuid>,
    pub amount_per_m3: Money,
    pub effective_date: NaiveDate,
    pub description: Option<String>,
}
