use async_trait::async_trait;
use common::{error::Res, jwt::JwtClaims};
use db::{
    dtos::{payment::PaymentCreateRequest, subscription::SubscriptionUpdate},
    models::{subscription::Subscription, user::User},
};

pub mod memory;
pub mod pg;

pub use memory::InMemoryBillingStore;
pub use pg::PgBillingStore;

/// Identity of the caller as issued by the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountProfile {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Every write one webhook event produces. Applied in a single unit
/// together with the claim on the event id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub subscription: Option<SubscriptionUpdate>,
    pub payment: Option<PaymentCreateRequest>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.subscription.is_none() && self.payment.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// Another delivery of the same event committed first.
    Duplicate,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn is_event_processed(&self, event_id: &str) -> Res<bool>;

    async fn find_user(&self, user_id: &str) -> Res<Option<User>>;

    async fn find_subscription_by_user(&self, user_id: &str) -> Res<Option<Subscription>>;

    async fn find_subscription_by_customer(&self, customer_id: &str)
    -> Res<Option<Subscription>>;

    /// Mirrors the user and makes sure a FREE/ACTIVE subscription row exists.
    async fn ensure_account(&self, profile: &AccountProfile) -> Res<Subscription>;

    /// Stores `customer_id` unless the row already has one, and returns
    /// whichever id ends up stored.
    async fn assign_customer_id(&self, user_id: &str, customer_id: &str) -> Res<String>;

    /// Claims `event_id` and applies `changes` atomically. Nothing is
    /// written when the claim fails or any write errors.
    async fn commit(
        &self,
        event_id: &str,
        event_type: &str,
        changes: &Reconciliation,
    ) -> Res<CommitOutcome>;
}

impl From<&JwtClaims> for AccountProfile {
    fn from(claims: &JwtClaims) -> Self {
        AccountProfile {
            user_id: claims.user_id.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
        }
    }
}
