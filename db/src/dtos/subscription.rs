use chrono::{DateTime, Utc};
use common::plans::Plan;
use uuid::Uuid;

use crate::models::subscription::{Subscription, SubscriptionStatus};

/// Row selector for a subscription update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKey {
    UserId(String),
    Id(Uuid),
}

/// Column-level patch. `None` leaves a column untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionPatch {
    pub plan: Option<Plan>,
    pub status: Option<SubscriptionStatus>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<Option<String>>,
    pub stripe_price_id: Option<Option<String>>,
    pub stripe_current_period_end: Option<DateTime<Utc>>,
    pub stripe_cancel_at_period_end: Option<bool>,
    pub trial_ends_at: Option<Option<DateTime<Utc>>>,
    pub canceled_at: Option<Option<DateTime<Utc>>>,
}

impl SubscriptionPatch {
    pub fn is_empty(&self) -> bool {
        *self == SubscriptionPatch::default()
    }

    /// Applies the patch to an in-memory row the same way the SQL update does.
    pub fn apply_to(&self, sub: &mut Subscription) {
        if let Some(plan) = self.plan {
            sub.plan = plan;
        }
        if let Some(status) = self.status {
            sub.status = status;
        }
        if let Some(customer_id) = &self.stripe_customer_id {
            sub.stripe_customer_id = Some(customer_id.clone());
        }
        if let Some(subscription_id) = &self.stripe_subscription_id {
            sub.stripe_subscription_id = subscription_id.clone();
        }
        if let Some(price_id) = &self.stripe_price_id {
            sub.stripe_price_id = price_id.clone();
        }
        if let Some(period_end) = self.stripe_current_period_end {
            sub.stripe_current_period_end = Some(period_end);
        }
        if let Some(cancel) = self.stripe_cancel_at_period_end {
            sub.stripe_cancel_at_period_end = cancel;
        }
        if let Some(trial_end) = self.trial_ends_at {
            sub.trial_ends_at = trial_end;
        }
        if let Some(canceled_at) = self.canceled_at {
            sub.canceled_at = canceled_at;
        }
        sub.updated_at = Utc::now();
    }
}

/// A patch aimed at one row, optionally guarded by the row's current status.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub key: SubscriptionKey,
    pub patch: SubscriptionPatch,
    pub only_if_status: Option<SubscriptionStatus>,
}
