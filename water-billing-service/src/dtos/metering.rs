use crate::error::BillingError;
use crate::models::{parse_usage_month, CreateWaterRate, Money, RecordUsage, UpdateUsage};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWaterRateRequest {
    pub subscription_type_id: Uuid,
    pub category_id: Option<Uuid>,

    #[validate(range(min = 1, max = 1_000_000_000, message = "Amount per m³ must be between 1 and 1,000,000,000"))]
    pub amount_per_m3: i64,

    pub effective_date: NaiveDate,

    #[validate(length(max = 500, message = "Description is too long"))]
    pub description: Option<String>,
}

impl From<CreateWaterRateRequest> for CreateWaterRate {
    fn from(req: CreateWaterRateRequest) -> Self {
        Self {
            subscription_type_id: req.subscription_type_id,
            category_id: req.category_id,
            amount_per_m3: Money::from_minor(req.amount_per_m3),
            effective_date: req.effective_date,
            description: req.description,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveRateParams {
    pub subscription_type_id: Uuid,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordUsageRequest {
    pub customer_id: Uuid,

    /// `YYYY-MM` or a full date inside the month.
    #[validate(length(min = 7, max = 10, message = "Usage month must be YYYY-MM"))]
    pub usage_month: String,

    pub meter_end: Decimal,

    #[validate(length(max = 1000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

impl TryFrom<RecordUsageRequest> for RecordUsage {
    type Error = BillingError;

    fn try_from(req: RecordUsageRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            customer_id: req.customer_id,
            usage_month: parse_usage_month(&req.usage_month)?,
            meter_end: req.meter_end,
            notes: req.notes,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUsageRequest {
    pub meter_end: Option<Decimal>,

    #[validate(length(max = 1000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

impl From<UpdateUsageRequest> for UpdateUsage {
    fn from(req: UpdateUsageRequest) -> Self {
        Self {
            meter_end: req.meter_end,
            notes: req.notes,
        }
    }
}
