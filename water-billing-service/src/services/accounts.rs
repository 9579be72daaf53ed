//! Subscription types and customer registration.

use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Actor, CreateCustomer, CreateSubscriptionType, Customer, CustomerStatus, SubscriptionType,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn BillingStore>,
}

impl AccountService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, input, actor), fields(name = %input.name, operator = %actor.operator_id))]
    pub async fn create_subscription_type(
        &self,
        input: CreateSubscriptionType,
        actor: &Actor,
    ) -> BillingResult<SubscriptionType> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(BillingError::validation("Subscription type name is required"));
        }
        if [input.monthly_fee, input.registration_fee, input.maintenance_fee]
            .iter()
            .any(|fee| fee.is_negative())
        {
            return Err(BillingError::validation("Fees cannot be negative"));
        }
        if input.late_fee_percentage < Decimal::ZERO
            || input.late_fee_percentage > Decimal::ONE_HUNDRED
        {
            return Err(BillingError::validation(
                "Late fee percentage must be between 0 and 100",
            ));
        }

        let subscription = SubscriptionType {
            subscription_type_id: Uuid::new_v4(),
            name: name.to_string(),
            description: input.description,
            monthly_fee: input.monthly_fee,
            registration_fee: input.registration_fee,
            maintenance_fee: input.maintenance_fee,
            late_fee_percentage: input.late_fee_percentage,
            is_active: true,
            created_utc: Utc::now(),
        };
        self.store.insert_subscription_type(&subscription).await?;

        info!(
            subscription_type_id = %subscription.subscription_type_id,
            monthly_fee = %subscription.monthly_fee,
            "Subscription type created"
        );
        Ok(subscription)
    }

    pub async fn get_subscription_type(&self, id: Uuid) -> BillingResult<SubscriptionType> {
        self.store
            .get_subscription_type(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription type", id))
    }

    /// Administrative retirement. Fees stay as they were so historical
    /// invoices keep their meaning.
    #[instrument(skip(self, actor), fields(operator = %actor.operator_id))]
    pub async fn deactivate_subscription_type(
        &self,
        id: Uuid,
        actor: &Actor,
    ) -> BillingResult<SubscriptionType> {
        let subscription = self
            .store
            .set_subscription_type_active(id, false)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription type", id))?;
        info!(subscription_type_id = %id, "Subscription type deactivated");
        Ok(subscription)
    }

    #[instrument(skip(self, input, actor), fields(subscription_type_id = %input.subscription_type_id, operator = %actor.operator_id))]
    pub async fn register_customer(
        &self,
        input: CreateCustomer,
        actor: &Actor,
    ) -> BillingResult<Customer> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(BillingError::validation("Customer name is required"));
        }
        let subscription = self.get_subscription_type(input.subscription_type_id).await?;
        if !subscription.is_active {
            return Err(BillingError::invalid_state(format!(
                "Subscription type '{}' is inactive",
                subscription.name
            )));
        }

        let customer = Customer {
            customer_id: Uuid::new_v4(),
            name: name.to_string(),
            meter_number: input
                .meter_number
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            subscription_type_id: subscription.subscription_type_id,
            status: CustomerStatus::Active,
            registration_date: input.registration_date,
            created_utc: Utc::now(),
        };
        self.store.insert_customer(&customer).await?;

        info!(customer_id = %customer.customer_id, "Customer registered");
        Ok(customer)
    }

    pub async fn get_customer(&self, id: Uuid) -> BillingResult<Customer> {
        self.store
            .get_customer(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", id))
    }

    pub async fn activate_customer(&self, id: Uuid, actor: &Actor) -> BillingResult<Customer> {
        self.set_customer_status(id, CustomerStatus::Active, None, actor)
            .await
    }

    pub async fn deactivate_customer(
        &self,
        id: Uuid,
        reason: Option<String>,
        actor: &Actor,
    ) -> BillingResult<Customer> {
        self.set_customer_status(id, CustomerStatus::Inactive, reason, actor)
            .await
    }

    pub async fn suspend_customer(
        &self,
        id: Uuid,
        reason: Option<String>,
        actor: &Actor,
    ) -> BillingResult<Customer> {
        self.set_customer_status(id, CustomerStatus::Suspended, reason, actor)
            .await
    }

    /// Move a customer to `status`. Only active customers are picked up by
    /// billing runs; readings and invoices already issued are unaffected.
    #[instrument(skip(self, reason, actor), fields(status = status.as_str(), operator = %actor.operator_id))]
    pub async fn set_customer_status(
        &self,
        id: Uuid,
        status: CustomerStatus,
        reason: Option<String>,
        actor: &Actor,
    ) -> BillingResult<Customer> {
        let current = self.get_customer(id).await?;
        if current.status == status {
            return Err(BillingError::invalid_state(format!(
                "Customer {} is already {}",
                id,
                status.as_str()
            )));
        }

        let customer = self
            .store
            .set_customer_status(id, status)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", id))?;

        info!(
            customer_id = %id,
            from = current.status.as_str(),
            to = status.as_str(),
            reason = reason.as_deref().unwrap_or(""),
            "Customer status changed"
        );
        Ok(customer)
    }
}
