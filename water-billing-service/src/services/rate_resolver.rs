//! Effective-dated tariff lookup and rate administration.

use super::metrics::RATE_CACHE_LOOKUPS;
use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{Actor, CreateWaterRate, WaterRate};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Pick the rate in effect for `(category, as_of)`: the latest effective
/// date wins, ties go to the most recently created version.
pub fn select_rate<'a, I>(rates: I, category_id: Option<Uuid>, as_of: NaiveDate) -> Option<&'a WaterRate>
where
    I: IntoIterator<Item = &'a WaterRate>,
{
    rates
        .into_iter()
        .filter(|rate| rate.applies_to(category_id, as_of))
        .max_by_key(|rate| (rate.effective_date, rate.created_utc))
}

/// Resolves against each subscription type's full version list, cached per
/// type, so the cache holds at most one entry per subscription type.
#[derive(Clone)]
pub struct RateResolver {
    store: Arc<dyn BillingStore>,
    cache: Arc<DashMap<Uuid, Arc<Vec<WaterRate>>>>,
    generation: Arc<AtomicU64>,
}

impl RateResolver {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Rate in effect for a subscription type on `as_of`.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        subscription_type_id: Uuid,
        as_of: NaiveDate,
        category_id: Option<Uuid>,
    ) -> BillingResult<WaterRate> {
        let rates = self.rates_for(subscription_type_id).await?;
        let rate = select_rate(rates.iter(), category_id, as_of)
            .cloned()
            .ok_or(BillingError::RateNotFound {
                subscription_type_id,
                as_of,
            })?;

        debug!(rate_id = %rate.rate_id, effective_date = %rate.effective_date, "Rate resolved");
        Ok(rate)
    }

    async fn rates_for(&self, subscription_type_id: Uuid) -> BillingResult<Arc<Vec<WaterRate>>> {
        if let Some(hit) = self.cache.get(&subscription_type_id) {
            RATE_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            return Ok(Arc::clone(hit.value()));
        }
        RATE_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();

        let generation = self.generation.load(Ordering::Acquire);
        let rates = Arc::new(self.store.rates_for_subscription(subscription_type_id).await?);

        self.cache.insert(subscription_type_id, Arc::clone(&rates));
        // A write that raced this load may have cleared the cache before
        // the insert above; drop the entry so it cannot outlive that write.
        if self.generation.load(Ordering::Acquire) != generation {
            self.cache.remove(&subscription_type_id);
        }
        Ok(rates)
    }

    pub async fn current_rate(
        &self,
        subscription_type_id: Uuid,
        category_id: Option<Uuid>,
    ) -> BillingResult<WaterRate> {
        self.resolve(subscription_type_id, Utc::now().date_naive(), category_id)
            .await
    }

    /// All versions for a subscription type, newest effective date first.
    pub async fn rate_history(&self, subscription_type_id: Uuid) -> BillingResult<Vec<WaterRate>> {
        self.store
            .get_subscription_type(subscription_type_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription type", subscription_type_id))?;

        let mut rates = self.store.rates_for_subscription(subscription_type_id).await?;
        rates.sort_by(|a, b| {
            b.effective_date
                .cmp(&a.effective_date)
                .then(b.created_utc.cmp(&a.created_utc))
        });
        Ok(rates)
    }

    #[instrument(skip(self, input, actor), fields(subscription_type_id = %input.subscription_type_id, operator = %actor.operator_id))]
    pub async fn create_rate(&self, input: CreateWaterRate, actor: &Actor) -> BillingResult<WaterRate> {
        if !input.amount_per_m3.is_positive() {
            return Err(BillingError::validation(
                "Amount per m³ must be greater than zero",
            ));
        }
        self.store
            .get_subscription_type(input.subscription_type_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription type", input.subscription_type_id))?;

        let rate = WaterRate {
            rate_id: Uuid::new_v4(),
            subscription_type_id: input.subscription_type_id,
            category_id: input.category_id,
            amount_per_m3: input.amount_per_m3,
            effective_date: input.effective_date,
            active: true,
            description: input.description,
            created_utc: Utc::now(),
        };
        self.store.insert_rate(&rate).await?;
        self.invalidate();

        info!(
            rate_id = %rate.rate_id,
            amount_per_m3 = %rate.amount_per_m3,
            effective_date = %rate.effective_date,
            "Water rate created"
        );
        Ok(rate)
    }

    pub async fn activate_rate(&self, rate_id: Uuid, actor: &Actor) -> BillingResult<WaterRate> {
        self.set_active(rate_id, true, actor).await
    }

    pub async fn deactivate_rate(&self, rate_id: Uuid, actor: &Actor) -> BillingResult<WaterRate> {
        self.set_active(rate_id, false, actor).await
    }

    #[instrument(skip(self, actor), fields(operator = %actor.operator_id))]
    async fn set_active(&self, rate_id: Uuid, active: bool, actor: &Actor) -> BillingResult<WaterRate> {
        let rate = self
            .store
            .set_rate_active(rate_id, active)
            .await?
            .ok_or_else(|| BillingError::not_found("Water rate", rate_id))?;
        self.invalidate();

        info!(rate_id = %rate_id, active, "Water rate toggled");
        Ok(rate)
    }

    /// Drop every cached rate list.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Money;
    use chrono::{Duration, Utc};

    fn rate(effective: &str, amount: i64) -> WaterRate {
        WaterRate {
            rate_id: Uuid::new_v4(),
            subscription_type_id: Uuid::nil(),
            category_id: None,
            amount_per_m3: Money::from_minor(amount),
            effective_date: effective.parse().unwrap(),
            active: true,
            description: None,
            created_utc: Utc::now(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn latest_effective_rate_wins() {
        let rates = vec![rate("2023-01-01", 4_000), rate("2024-01-01", 5_000)];
        let picked = select_rate(&rates, None, date("2024-01-15")).unwrap();
        assert_eq!(picked.amount_per_m3, Money::from_minor(5_000));

        let picked = select_rate(&rates, None, date("2023-12-31")).unwrap();
        assert_eq!(picked.amount_per_m3, Money::from_minor(4_000));

        assert!(select_rate(&rates, None, date("2022-12-31")).is_none());
    }

    #[test]
    fn inactive_rates_are_skipped() {
        let mut newer = rate("2024-01-01", 5_000);
        newer.active = false;
        let rates = vec![rate("2023-01-01", 4_000), newer];
        let picked = select_rate(&rates, None, date("2024-06-01")).unwrap();
        assert_eq!(picked.amount_per_m3, Money::from_minor(4_000));
    }

    #[test]
    fn ties_go_to_most_recently_created() {
        let older = rate("2024-01-01", 5_000);
        let mut newer = rate("2024-01-01", 6_000);
        newer.created_utc = older.created_utc + Duration::seconds(5);
        let rates = vec![newer.clone(), older];
        let picked = select_rate(&rates, None, date("2024-02-01")).unwrap();
        assert_eq!(picked.rate_id, newer.rate_id);
    }

    #[test]
    fn category_must_match_exactly() {
        let category = Uuid::new_v4();
        let mut categorised = rate("2024-01-01", 7_000);
        categorised.category_id = Some(category);
        let rates = vec![rate("2024-01-01", 5_000), categorised];

        let picked = select_rate(&rates, Some(category), date("2024-02-01")).unwrap();
        assert_eq!(picked.amount_per_m3, Money::from_minor(7_000));
        let picked = select_rate(&rates, None, date("2024-02-01")).unwrap();
        assert_eq!(picked.amount_per_m3, Money::from_minor(5_000));
    }
}
