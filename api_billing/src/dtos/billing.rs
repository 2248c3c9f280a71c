use chrono::{DateTime, Utc};
use common::plans::{BillingInterval, Plan, PlanLimits};
use db::models::subscription::{Subscription, SubscriptionStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
    #[serde(default)]
    pub interval: BillingInterval,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub has_billing_account: bool,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: SubscriptionView,
    pub limits: PlanLimits,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        SubscriptionResponse {
            limits: sub.plan.limits(),
            subscription: SubscriptionView {
                plan: sub.plan,
                status: sub.status,
                current_period_end: sub.stripe_current_period_end,
                cancel_at_period_end: sub.stripe_cancel_at_period_end,
                trial_ends_at: sub.trial_ends_at,
                canceled_at: sub.canceled_at,
                has_billing_account: sub.stripe_customer_id.is_some(),
            },
        }
    }
}
