use async_trait::async_trait;
use common::{
    error::Res,
    plans::{BillingInterval, Plan},
};

pub mod stripe;

pub use self::stripe::StripeProvider;

/// The parts of a remote subscription the reconciler copies locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub user_id: String,
    pub plan: Plan,
    pub interval: BillingInterval,
    pub trial_period_days: u32,
    pub success_url: String,
    pub cancel_url: String,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Res<ProviderSubscription>;

    /// Returns the URL of a hosted billing-portal session.
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Res<String>;

    /// Returns the new customer id.
    async fn create_customer(&self, email: &str, name: Option<&str>, user_id: &str)
    -> Res<String>;

    /// Returns the URL of a hosted checkout page.
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Res<String>;
}
