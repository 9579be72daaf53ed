//! Meter readings: chaining, usage derivation and anomaly flagging.

use super::metrics::USAGE_ANOMALIES;
use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{check_meter_reading, Actor, Money, RecordUsage, UpdateUsage, WaterUsage};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Which rule flagged a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyRule {
    /// Usage above `factor ×` the trailing average.
    TrailingAverage,
    /// No history yet and usage above the absolute ceiling.
    Ceiling,
}

impl AnomalyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyRule::TrailingAverage => "trailing_average",
            AnomalyRule::Ceiling => "ceiling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyPolicy {
    pub window: usize,
    pub factor: Decimal,
    pub ceiling_m3: Decimal,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            window: 6,
            factor: Decimal::new(15, 1),
            ceiling_m3: Decimal::from(100),
        }
    }
}

impl AnomalyPolicy {
    /// `previous` holds earlier usage quantities, newest first. Only the
    /// first `window` of them count. A threshold beyond the decimal range
    /// cannot be exceeded.
    pub fn evaluate(&self, usage_m3: Decimal, previous: &[Decimal]) -> Option<AnomalyRule> {
        let trailing = &previous[..previous.len().min(self.window)];
        if trailing.is_empty() {
            return (usage_m3 > self.ceiling_m3).then_some(AnomalyRule::Ceiling);
        }
        let threshold = trailing
            .iter()
            .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(*value))
            .and_then(|total| total.checked_div(Decimal::from(trailing.len())))
            .and_then(|average| average.checked_mul(self.factor))?;
        (usage_m3 > threshold).then_some(AnomalyRule::TrailingAverage)
    }
}

#[derive(Clone)]
pub struct UsageCalculator {
    store: Arc<dyn BillingStore>,
    policy: AnomalyPolicy,
}

impl UsageCalculator {
    pub fn new(store: Arc<dyn BillingStore>, policy: AnomalyPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &AnomalyPolicy {
        &self.policy
    }

    /// Record a month's reading, chaining `meter_start` from the previous one.
    #[instrument(skip(self, input, actor), fields(customer_id = %input.customer_id, usage_month = %input.usage_month, operator = %actor.operator_id))]
    pub async fn record(&self, input: RecordUsage, actor: &Actor) -> BillingResult<WaterUsage> {
        check_meter_reading(input.meter_end)?;
        self.store
            .get_customer(input.customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", input.customer_id))?;

        let history = self
            .store
            .usage_history(input.customer_id, Some(self.policy.window))
            .await?;
        let previous = history.first();

        if let Some(previous) = previous {
            if previous.usage_month == input.usage_month {
                return Err(BillingError::conflict(format!(
                    "A reading for {} already exists for this customer",
                    input.usage_month.format("%Y-%m")
                )));
            }
            if previous.usage_month > input.usage_month {
                return Err(BillingError::validation(format!(
                    "Reading month {} is before the latest recorded month {}",
                    input.usage_month.format("%Y-%m"),
                    previous.usage_month.format("%Y-%m")
                )));
            }
        }

        let meter_start = previous.map_or(Decimal::ZERO, |p| p.meter_end);
        if input.meter_end < meter_start {
            return Err(BillingError::InvalidReading {
                meter_start,
                meter_end: input.meter_end,
            });
        }
        let usage_m3 = input.meter_end - meter_start;
        let trailing: Vec<Decimal> = history.iter().map(|u| u.usage_m3).collect();
        let anomaly = self.policy.evaluate(usage_m3, &trailing);

        let usage = WaterUsage {
            usage_id: Uuid::new_v4(),
            customer_id: input.customer_id,
            usage_month: input.usage_month,
            meter_start,
            meter_end: input.meter_end,
            usage_m3,
            amount_calculated: Money::ZERO,
            is_anomaly: anomaly.is_some(),
            notes: input.notes,
            invoice_id: None,
            recorded_by: actor.operator_id.clone(),
            recorded_utc: Utc::now(),
        };
        self.store
            .insert_usage(&usage, previous.map(|p| p.usage_id))
            .await?;

        if let Some(rule) = anomaly {
            USAGE_ANOMALIES.with_label_values(&[rule.as_str()]).inc();
            warn!(usage_id = %usage.usage_id, usage_m3 = %usage_m3, rule = rule.as_str(), "Reading flagged as anomalous");
        }
        info!(usage_id = %usage.usage_id, usage_m3 = %usage_m3, "Reading recorded");
        Ok(usage)
    }

    /// Correct the customer's latest reading while it is still uninvoiced.
    #[instrument(skip(self, changes, actor), fields(operator = %actor.operator_id))]
    pub async fn update_reading(
        &self,
        usage_id: Uuid,
        changes: UpdateUsage,
        actor: &Actor,
    ) -> BillingResult<WaterUsage> {
        let mut usage = self.get_usage(usage_id).await?;
        if usage.is_invoiced() {
            return Err(BillingError::invalid_state(
                "Reading has been invoiced and can no longer change",
            ));
        }

        let history = self
            .store
            .usage_history(usage.customer_id, Some(self.policy.window + 1))
            .await?;
        if history.first().map(|u| u.usage_id) != Some(usage_id) {
            return Err(BillingError::invalid_state(
                "Only the customer's most recent reading can be corrected",
            ));
        }

        if let Some(meter_end) = changes.meter_end {
            check_meter_reading(meter_end)?;
            if meter_end < usage.meter_start {
                return Err(BillingError::InvalidReading {
                    meter_start: usage.meter_start,
                    meter_end,
                });
            }
            usage.meter_end = meter_end;
            usage.usage_m3 = meter_end - usage.meter_start;
        }
        if changes.notes.is_some() {
            usage.notes = changes.notes;
        }

        let trailing: Vec<Decimal> = history.iter().skip(1).map(|u| u.usage_m3).collect();
        let anomaly = self.policy.evaluate(usage.usage_m3, &trailing);
        usage.is_anomaly = anomaly.is_some();

        self.store.update_usage(&usage).await?;

        if let Some(rule) = anomaly {
            USAGE_ANOMALIES.with_label_values(&[rule.as_str()]).inc();
            warn!(usage_id = %usage_id, usage_m3 = %usage.usage_m3, rule = rule.as_str(), "Corrected reading flagged as anomalous");
        }
        info!(usage_id = %usage_id, usage_m3 = %usage.usage_m3, "Reading corrected");
        Ok(usage)
    }

    pub async fn get_usage(&self, usage_id: Uuid) -> BillingResult<WaterUsage> {
        self.store
            .get_usage(usage_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Usage", usage_id))
    }

    /// Readings newest first.
    pub async fn usage_history(&self, customer_id: Uuid) -> BillingResult<Vec<WaterUsage>> {
        self.store
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", customer_id))?;
        self.store.usage_history(customer_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m3(values: &[i64]) -> Vec<Decimal> {
        values.iter().copied().map(Decimal::from).collect()
    }

    #[test]
    fn first_reading_uses_ceiling() {
        let policy = AnomalyPolicy::default();
        assert_eq!(policy.evaluate(Decimal::from(100), &[]), None);
        assert_eq!(
            policy.evaluate(Decimal::from(101), &[]),
            Some(AnomalyRule::Ceiling)
        );
    }

    #[test]
    fn flags_above_one_and_a_half_times_average() {
        let policy = AnomalyPolicy::default();
        let history = m3(&[20, 20, 20]);
        assert_eq!(policy.evaluate(Decimal::from(30), &history), None);
        assert_eq!(
            policy.evaluate(Decimal::from(31), &history),
            Some(AnomalyRule::TrailingAverage)
        );
    }

    #[test]
    fn only_window_readings_count() {
        let policy = AnomalyPolicy {
            window: 2,
            ..AnomalyPolicy::default()
        };
        // Newest two average 10; the old 100 is outside the window.
        let history = m3(&[10, 10, 100]);
        assert_eq!(
            policy.evaluate(Decimal::from(16), &history),
            Some(AnomalyRule::TrailingAverage)
        );
    }

    #[test]
    fn huge_history_does_not_overflow() {
        let policy = AnomalyPolicy::default();
        let huge = Decimal::MAX / Decimal::from(2);
        assert_eq!(policy.evaluate(huge, &[huge]), None);
        assert_eq!(policy.evaluate(huge, &[huge, huge, huge]), None);
    }
}
