#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use api_billing::{
    provider::{BillingProvider, CheckoutSessionRequest, ProviderSubscription},
    services::{
        checkout::CheckoutSettings,
        reconciler::{Reconciler, ReconcilerSettings},
        signature::WebhookVerifier,
    },
    state::BillingState,
    store::{AccountProfile, BillingStore, CommitOutcome, InMemoryBillingStore, Reconciliation},
};
use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::{AppError, Res},
    plans::{PlanPrices, PriceTable},
};
use db::models::{subscription::Subscription, user::User};
use mailer::{DunningNotice, Mailer, Recipient};
use serde_json::Value;

pub const SECRET: &str = "whsec_test";
pub const PORTAL_URL: &str = "https://billing.stripe.test/session/p_1";

pub fn prices() -> PriceTable {
    PriceTable {
        starter: PlanPrices {
            monthly: "price_starter_m".into(),
            yearly: "price_starter_y".into(),
        },
        pro: PlanPrices {
            monthly: "price_pro_m".into(),
            yearly: "price_pro_y".into(),
        },
        business: PlanPrices {
            monthly: "price_business_m".into(),
            yearly: "price_business_y".into(),
        },
    }
}

pub struct FakeProvider {
    pub subscription: Mutex<ProviderSubscription>,
    pub failing: AtomicBool,
    pub customers_created: AtomicUsize,
    pub portal_sessions: AtomicUsize,
    pub checkouts: Mutex<Vec<CheckoutSessionRequest>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        FakeProvider {
            subscription: Mutex::new(ProviderSubscription {
                id: "sub_1".into(),
                status: "trialing".into(),
                price_id: Some("price_pro_m".into()),
                current_period_end: Some(1_700_000_000),
                trial_end: Some(1_700_000_000),
                cancel_at_period_end: false,
            }),
            failing: AtomicBool::new(false),
            customers_created: AtomicUsize::new(0),
            portal_sessions: AtomicUsize::new(0),
            checkouts: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    pub fn set_status(&self, status: &str) {
        self.subscription.lock().unwrap().status = status.to_string();
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Res<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("provider unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingProvider for FakeProvider {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Res<ProviderSubscription> {
        self.check()?;
        let mut subscription = self.subscription.lock().unwrap().clone();
        subscription.id = subscription_id.to_string();
        Ok(subscription)
    }

    async fn create_portal_session(&self, customer_id: &str, _return_url: &str) -> Res<String> {
        self.check()?;
        assert!(customer_id.starts_with("cus_"));
        self.portal_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(PORTAL_URL.to_string())
    }

    async fn create_customer(
        &self,
        _email: &str,
        _name: Option<&str>,
        _user_id: &str,
    ) -> Res<String> {
        self.check()?;
        let n = self.customers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_new{}", n))
    }

    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Res<String> {
        self.check()?;
        self.checkouts.lock().unwrap().push(request.clone());
        Ok(format!("https://checkout.stripe.test/{}", request.price_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Welcome { to: String, plan: String },
    Dunning { to: String, notice: DunningNotice },
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentEmail>>,
    pub failing: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome(&self, to: &Recipient, plan_name: &str) -> Res<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("smtp down".into()));
        }
        self.sent.lock().unwrap().push(SentEmail::Welcome {
            to: to.email.clone(),
            plan: plan_name.to_string(),
        });
        Ok(())
    }

    async fn send_dunning(&self, to: &Recipient, notice: &DunningNotice) -> Res<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("smtp down".into()));
        }
        self.sent.lock().unwrap().push(SentEmail::Dunning {
            to: to.email.clone(),
            notice: notice.clone(),
        });
        Ok(())
    }
}

/// Store whose dedup pre-check never sees an earlier delivery, as when two
/// deliveries of one event read before either commits.
pub struct RacingStore(pub Arc<InMemoryBillingStore>);

#[async_trait]
impl BillingStore for RacingStore {
    async fn is_event_processed(&self, _event_id: &str) -> Res<bool> {
        Ok(false)
    }

    async fn find_user(&self, user_id: &str) -> Res<Option<User>> {
        self.0.find_user(user_id).await
    }

    async fn find_subscription_by_user(&self, user_id: &str) -> Res<Option<Subscription>> {
        self.0.find_subscription_by_user(user_id).await
    }

    async fn find_subscription_by_customer(
        &self,
        customer_id: &str,
    ) -> Res<Option<Subscription>> {
        self.0.find_subscription_by_customer(customer_id).await
    }

    async fn ensure_account(&self, profile: &AccountProfile) -> Res<Subscription> {
        self.0.ensure_account(profile).await
    }

    async fn assign_customer_id(&self, user_id: &str, customer_id: &str) -> Res<String> {
        self.0.assign_customer_id(user_id, customer_id).await
    }

    async fn commit(
        &self,
        event_id: &str,
        event_type: &str,
        changes: &Reconciliation,
    ) -> Res<CommitOutcome> {
        self.0.commit(event_id, event_type, changes).await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryBillingStore>,
    pub provider: Arc<FakeProvider>,
    pub mailer: Arc<RecordingMailer>,
    pub reconciler: Reconciler,
}

pub fn reconciler(
    store: Arc<dyn BillingStore>,
    provider: Arc<FakeProvider>,
    mailer: Arc<RecordingMailer>,
) -> Reconciler {
    Reconciler::new(
        ReconcilerSettings {
            webhook_secret: SECRET.to_string(),
            tolerance_secs: 300,
            prices: prices(),
            portal_return_url: "https://app.test/settings/billing".to_string(),
        },
        store,
        provider,
        mailer,
    )
}

/// Store seeded with user `u1` on the FREE plan.
pub fn harness() -> Harness {
    let store = Arc::new(InMemoryBillingStore::new());
    store
        .insert_user(User {
            id: "u1".into(),
            email: "ada@example.com".into(),
            name: Some("Ada".into()),
            created_at: Utc::now(),
        })
        .unwrap();
    store.insert_subscription(Subscription::free("u1")).unwrap();

    let provider = Arc::new(FakeProvider::default());
    let mailer = Arc::new(RecordingMailer::default());
    Harness {
        reconciler: reconciler(store.clone(), provider.clone(), mailer.clone()),
        store,
        provider,
        mailer,
    }
}

pub fn billing_state(harness: &Harness) -> BillingState {
    BillingState {
        reconciler: reconciler(
            harness.store.clone(),
            harness.provider.clone(),
            harness.mailer.clone(),
        ),
        store: harness.store.clone(),
        provider: harness.provider.clone(),
        checkout: CheckoutSettings {
            prices: prices(),
            trial_period_days: 14,
            app_url: "https://app.test".to_string(),
        },
        portal_return_url: "https://app.test/settings/billing".to_string(),
    }
}

/// Moves `u1` onto a paid plan with a stored customer id.
pub fn make_paying(harness: &Harness, status: db::models::subscription::SubscriptionStatus) {
    let mut sub = harness.store.subscription_for("u1").unwrap().unwrap();
    sub.plan = common::plans::Plan::Pro;
    sub.status = status;
    sub.stripe_customer_id = Some("cus_1".into());
    sub.stripe_subscription_id = Some("sub_1".into());
    sub.stripe_price_id = Some("price_pro_m".into());
    harness.store.insert_subscription(sub).unwrap();
}

pub fn event(id: &str, type_: &str, object: Value) -> Vec<u8> {
    serde_json::json!({
        "id": id,
        "object": "event",
        "type": type_,
        "created": 1_700_000_500,
        "data": { "object": object }
    })
    .to_string()
    .into_bytes()
}

pub fn sign(payload: &[u8]) -> String {
    WebhookVerifier::new(SECRET, 300)
        .sign(payload, Utc::now().timestamp())
        .unwrap()
}

pub fn checkout_completed(id: &str) -> Vec<u8> {
    event(
        id,
        "checkout.session.completed",
        serde_json::json!({
            "id": "cs_1",
            "object": "checkout.session",
            "customer": "cus_1",
            "subscription": "sub_1",
            "metadata": { "userId": "u1", "plan": "pro", "interval": "monthly" }
        }),
    )
}

pub fn invoice(id: &str, type_: &str, attempt: u32) -> Vec<u8> {
    let paid = type_ == "invoice.paid";
    let amount_paid = if paid { 4900 } else { 0 };
    let paid_at = if paid { Some(1_700_000_400) } else { None };
    event(
        id,
        type_,
        serde_json::json!({
            "id": "in_1",
            "object": "invoice",
            "customer": "cus_1",
            "payment_intent": "pi_1",
            "amount_paid": amount_paid,
            "amount_due": 4900,
            "currency": "usd",
            "attempt_count": attempt,
            "status_transitions": { "paid_at": paid_at }
        }),
    )
}
