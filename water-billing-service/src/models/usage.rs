//! Monthly meter readings.

use super::Money;
use crate::error::BillingError;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A meter reading for one customer and month. `meter_start` chains from the
/// previous reading's `meter_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterUsage {
    pub usage_id: Uuid,
    pub customer_id: Uuid,
    /// First day of the billed month.
    pub usage_month: NaiveDate,
    pub meter_start: Decimal,
    pub meter_end: Decimal,
    pub usage_m3: Decimal,
    /// Usage charge once an invoice has priced this reading.
    pub amount_calculated: Money,
    pub is_anomaly: bool,
    pub notes: Option<String>,
    /// Set when an invoice is generated; the reading is frozen from then on.
    pub invoice_id: Option<Uuid>,
    pub recorded_by: String,
    pub recorded_utc: DateTime<Utc>,
}

impl WaterUsage {
    pub fn is_invoiced(&self) -> bool {
        self.invoice_id.is_some()
    }
}

/// Input for recording a reading.
#[derive(Debug, Clone)]
pub struct RecordUsage {
    pub customer_id: Uuid,
    pub usage_month: NaiveDate,
    pub meter_end: Decimal,
    pub notes: Option<String>,
}

/// Input for correcting a reading that has not been invoiced.
#[derive(Debug, Clone, Default)]
pub struct UpdateUsage {
    pub meter_end: Option<Decimal>,
    pub notes: Option<String>,
}

/// Largest meter value the register can hold: 11 integer digits, 3 decimals.
pub fn max_meter_reading() -> Decimal {
    Decimal::new(99_999_999_999_999, 3)
}

/// Reject meter values outside `0..=max_meter_reading()`.
pub fn check_meter_reading(meter_end: Decimal) -> Result<(), BillingError> {
    if meter_end < Decimal::ZERO {
        return Err(BillingError::validation("Meter readings cannot be negative"));
    }
    if meter_end > max_meter_reading() {
        return Err(BillingError::validation(format!(
            "Meter reading {} exceeds the register maximum {}",
            meter_end,
            max_meter_reading()
        )));
    }
    Ok(())
}

/// Normalise `YYYY-MM` or `YYYY-MM-DD` to the first day of that month.
pub fn parse_usage_month(input: &str) -> Result<NaiveDate, BillingError> {
    let trimmed = input.trim();
    let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d"))
        .map_err(|_| {
            BillingError::validation(format!(
                "Invalid usage month '{}', expected YYYY-MM",
                input
            ))
        })?;
    Ok(first_of_month(parsed))
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}
