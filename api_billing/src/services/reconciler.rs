use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::plans::{Plan, PriceTable};
use db::{
    dtos::{
        payment::PaymentCreateRequest,
        subscription::{SubscriptionKey, SubscriptionPatch, SubscriptionUpdate},
    },
    models::{payment::PaymentStatus, subscription::SubscriptionStatus, user::User},
};
use mailer::{DunningNotice, Mailer, Recipient};

use crate::{
    error::WebhookError,
    models::event::{
        CheckoutSessionObject, EventKind, InvoiceObject, SubscriptionObject, WebhookEvent,
    },
    provider::BillingProvider,
    services::signature::WebhookVerifier,
    store::{BillingStore, CommitOutcome, Reconciliation},
};

pub const FAILED_PAYMENT_REASON: &str = "Payment method declined";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Duplicate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// State changes were committed.
    Processed(EventKind),
    /// The event was recorded but carried nothing to correlate with.
    Acknowledged(EventKind),
    /// The event type is not handled; nothing was recorded.
    Ignored(String),
    Skipped(SkipReason),
}

enum Notification {
    Welcome { to: Recipient, plan: Plan },
    Dunning { to: Recipient, notice: DunningNotice },
}

/// What an event asks for, computed before anything is written.
#[derive(Default)]
struct Effects {
    changes: Reconciliation,
    notification: Option<Notification>,
}

impl Effects {
    fn none() -> Self {
        Self::default()
    }
}

pub struct ReconcilerSettings {
    pub webhook_secret: String,
    pub tolerance_secs: i64,
    pub prices: PriceTable,
    /// Where the billing portal sends the customer back to.
    pub portal_return_url: String,
}

/// Turns verified Stripe webhook deliveries into local subscription state.
///
/// Every handled event is applied at most once: effects are planned from
/// reads and provider calls only, then committed together with the claim
/// on the event id. Emails go out after the commit and never fail the
/// delivery.
pub struct Reconciler {
    verifier: WebhookVerifier,
    prices: PriceTable,
    portal_return_url: String,
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn BillingProvider>,
    mailer: Arc<dyn Mailer>,
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

fn recipient_of(user: User) -> Option<Recipient> {
    if user.email.is_empty() {
        return None;
    }
    Some(Recipient {
        email: user.email,
        name: user.name,
    })
}

fn invalid_payload(event: &WebhookEvent, e: serde_json::Error) -> WebhookError {
    WebhookError::Validation(format!("Malformed {} payload: {}", event.type_, e))
}

impl Reconciler {
    pub fn new(
        settings: ReconcilerSettings,
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn BillingProvider>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Reconciler {
            verifier: WebhookVerifier::new(settings.webhook_secret, settings.tolerance_secs),
            prices: settings.prices,
            portal_return_url: settings.portal_return_url,
            store,
            provider,
            mailer,
        }
    }

    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WebhookError::Validation("Missing signature".to_string()))?;

        self.verifier
            .verify(payload, signature)
            .map_err(|e| WebhookError::Authentication(e.to_string()))?;

        let event = WebhookEvent::from_slice(payload)
            .map_err(|e| WebhookError::Validation(format!("Invalid event payload: {}", e)))?;

        self.apply_event(&event).await
    }

    /// Reconciles an event whose signature was already checked.
    pub async fn apply_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<ReconcileOutcome, WebhookError> {
        if self.store.is_event_processed(&event.id).await? {
            log::info!("Skipping already processed event {}", event.id);
            return Ok(ReconcileOutcome::Skipped(SkipReason::Duplicate));
        }

        let Some(kind) = event.kind() else {
            log::info!("Unhandled event type: {}", event.type_);
            return Ok(ReconcileOutcome::Ignored(event.type_.clone()));
        };

        log::info!("Processing webhook event {} ({})", event.id, kind);
        let effects = match kind {
            EventKind::CheckoutCompleted => self.plan_checkout_completed(event).await?,
            EventKind::SubscriptionUpdated => self.plan_subscription_updated(event).await?,
            EventKind::SubscriptionDeleted => self.plan_subscription_deleted(event).await?,
            EventKind::InvoicePaid => self.plan_invoice_paid(event).await?,
            EventKind::InvoicePaymentFailed => self.plan_invoice_failed(event).await?,
        };

        let acknowledged_only = effects.changes.is_empty();
        match self
            .store
            .commit(&event.id, kind.as_str(), &effects.changes)
            .await?
        {
            CommitOutcome::Duplicate => {
                log::info!("Event {} was committed by a concurrent delivery", event.id);
                return Ok(ReconcileOutcome::Skipped(SkipReason::Duplicate));
            }
            CommitOutcome::Applied => {}
        }

        if let Some(notification) = effects.notification {
            self.notify(notification).await;
        }

        Ok(if acknowledged_only {
            ReconcileOutcome::Acknowledged(kind)
        } else {
            ReconcileOutcome::Processed(kind)
        })
    }

    async fn notify(&self, notification: Notification) {
        let result = match &notification {
            Notification::Welcome { to, plan } => {
                self.mailer.send_welcome(to, plan.display_name()).await
            }
            Notification::Dunning { to, notice } => self.mailer.send_dunning(to, notice).await,
        };
        if let Err(e) = result {
            let to = match &notification {
                Notification::Welcome { to, .. } | Notification::Dunning { to, .. } => to,
            };
            log::error!("Failed to send billing email to {}: {}", to.email, e);
        }
    }

    async fn recipient(&self, user_id: &str) -> Result<Option<Recipient>, WebhookError> {
        Ok(self.store.find_user(user_id).await?.and_then(recipient_of))
    }

    /// Looks up the user a subscription event points at. Unknown users are
    /// logged and the event is acknowledged without changes.
    async fn known_user(
        &self,
        user_id: &str,
        event: &WebhookEvent,
    ) -> Result<Option<User>, WebhookError> {
        let user = self.store.find_user(user_id).await?;
        if user.is_none() {
            log::warn!("Event {} references unknown user {}", event.id, user_id);
        }
        Ok(user)
    }

    async fn plan_checkout_completed(&self, event: &WebhookEvent) -> Result<Effects, WebhookError> {
        let session: CheckoutSessionObject =
            event.object().map_err(|e| invalid_payload(event, e))?;

        let user_id = session.metadata_value("userId");
        let plan = session
            .metadata_value("plan")
            .and_then(|plan| plan.parse::<Plan>().ok())
            .filter(Plan::is_paid);
        let (Some(user_id), Some(plan)) = (user_id, plan) else {
            log::warn!(
                "Checkout session {} lacks a user id or a paid plan in metadata",
                session.id
            );
            return Ok(Effects::none());
        };
        let Some(subscription_id) = session.subscription_id() else {
            log::warn!("Checkout session {} has no subscription", session.id);
            return Ok(Effects::none());
        };
        let Some(user) = self.known_user(user_id, event).await? else {
            return Ok(Effects::none());
        };

        let remote = self.provider.retrieve_subscription(subscription_id).await?;
        let patch = SubscriptionPatch {
            plan: Some(plan),
            status: Some(SubscriptionStatus::from_provider(&remote.status)),
            stripe_customer_id: session.customer_id().map(str::to_string),
            stripe_subscription_id: Some(Some(remote.id.clone())),
            stripe_price_id: remote.price_id.clone().map(Some),
            stripe_current_period_end: remote.current_period_end.and_then(timestamp),
            stripe_cancel_at_period_end: Some(remote.cancel_at_period_end),
            trial_ends_at: Some(remote.trial_end.and_then(timestamp)),
            ..Default::default()
        };

        Ok(Effects {
            changes: Reconciliation {
                subscription: Some(SubscriptionUpdate {
                    key: SubscriptionKey::UserId(user_id.to_string()),
                    patch,
                    only_if_status: None,
                }),
                payment: None,
            },
            notification: recipient_of(user).map(|to| Notification::Welcome { to, plan }),
        })
    }

    async fn plan_subscription_updated(
        &self,
        event: &WebhookEvent,
    ) -> Result<Effects, WebhookError> {
        let sub: SubscriptionObject = event.object().map_err(|e| invalid_payload(event, e))?;
        let Some(user_id) = sub.metadata_value("userId") else {
            log::warn!("Subscription {} has no user id in metadata", sub.id);
            return Ok(Effects::none());
        };
        if self.known_user(user_id, event).await?.is_none() {
            return Ok(Effects::none());
        }

        let price_id = sub.price_id();
        let plan = price_id
            .map(|price_id| self.prices.plan_for_price(price_id))
            .filter(Plan::is_paid);
        if plan.is_none() {
            log::warn!(
                "Price {:?} of subscription {} matches no plan, keeping current plan",
                price_id,
                sub.id
            );
        }

        let patch = SubscriptionPatch {
            plan,
            status: Some(SubscriptionStatus::from_provider(&sub.status)),
            stripe_price_id: price_id.map(|price_id| Some(price_id.to_string())),
            stripe_current_period_end: sub.period_end().and_then(timestamp),
            stripe_cancel_at_period_end: Some(sub.cancel_at_period_end),
            trial_ends_at: Some(sub.trial_end.and_then(timestamp)),
            ..Default::default()
        };

        Ok(Effects {
            changes: Reconciliation {
                subscription: Some(SubscriptionUpdate {
                    key: SubscriptionKey::UserId(user_id.to_string()),
                    patch,
                    only_if_status: None,
                }),
                payment: None,
            },
            notification: None,
        })
    }

    async fn plan_subscription_deleted(
        &self,
        event: &WebhookEvent,
    ) -> Result<Effects, WebhookError> {
        let sub: SubscriptionObject = event.object().map_err(|e| invalid_payload(event, e))?;
        let Some(user_id) = sub.metadata_value("userId") else {
            log::warn!("Subscription {} has no user id in metadata", sub.id);
            return Ok(Effects::none());
        };
        if self.known_user(user_id, event).await?.is_none() {
            return Ok(Effects::none());
        }

        let patch = SubscriptionPatch {
            plan: Some(Plan::Free),
            status: Some(SubscriptionStatus::Canceled),
            stripe_subscription_id: Some(None),
            stripe_price_id: Some(None),
            stripe_cancel_at_period_end: Some(false),
            canceled_at: Some(Some(Utc::now())),
            ..Default::default()
        };

        Ok(Effects {
            changes: Reconciliation {
                subscription: Some(SubscriptionUpdate {
                    key: SubscriptionKey::UserId(user_id.to_string()),
                    patch,
                    only_if_status: None,
                }),
                payment: None,
            },
            notification: None,
        })
    }

    async fn plan_invoice_paid(&self, event: &WebhookEvent) -> Result<Effects, WebhookError> {
        let invoice: InvoiceObject = event.object().map_err(|e| invalid_payload(event, e))?;
        let Some(customer_id) = invoice.customer_id() else {
            log::warn!("Invoice {} has no customer", invoice.id);
            return Ok(Effects::none());
        };
        let Some(subscription) = self.store.find_subscription_by_customer(customer_id).await?
        else {
            log::warn!("No subscription for customer {} (invoice {})", customer_id, invoice.id);
            return Ok(Effects::none());
        };

        let payment = PaymentCreateRequest {
            subscription_id: subscription.id,
            stripe_event_id: event.id.clone(),
            stripe_invoice_id: invoice.id.clone(),
            stripe_payment_intent_id: invoice.payment_intent_id().map(str::to_string),
            amount: invoice.amount_paid,
            currency: invoice.currency.clone(),
            status: PaymentStatus::Paid,
            paid_at: invoice
                .paid_at()
                .or(Some(event.created))
                .and_then(timestamp),
            failure_reason: None,
        };

        Ok(Effects {
            changes: Reconciliation {
                subscription: Some(SubscriptionUpdate {
                    key: SubscriptionKey::Id(subscription.id),
                    patch: SubscriptionPatch {
                        status: Some(SubscriptionStatus::Active),
                        ..Default::default()
                    },
                    only_if_status: Some(SubscriptionStatus::PastDue),
                }),
                payment: Some(payment),
            },
            notification: None,
        })
    }

    async fn plan_invoice_failed(&self, event: &WebhookEvent) -> Result<Effects, WebhookError> {
        let invoice: InvoiceObject = event.object().map_err(|e| invalid_payload(event, e))?;
        let Some(customer_id) = invoice.customer_id() else {
            log::warn!("Invoice {} has no customer", invoice.id);
            return Ok(Effects::none());
        };
        let Some(subscription) = self.store.find_subscription_by_customer(customer_id).await?
        else {
            log::warn!("No subscription for customer {} (invoice {})", customer_id, invoice.id);
            return Ok(Effects::none());
        };

        let payment = PaymentCreateRequest {
            subscription_id: subscription.id,
            stripe_event_id: event.id.clone(),
            stripe_invoice_id: invoice.id.clone(),
            stripe_payment_intent_id: invoice.payment_intent_id().map(str::to_string),
            amount: invoice.amount_due,
            currency: invoice.currency.clone(),
            status: PaymentStatus::Failed,
            paid_at: None,
            failure_reason: Some(FAILED_PAYMENT_REASON.to_string()),
        };

        // the portal link must exist before the failure is recorded
        let notification = match self.recipient(&subscription.user_id).await? {
            Some(to) => {
                let portal_url = self
                    .provider
                    .create_portal_session(customer_id, &self.portal_return_url)
                    .await?;
                Some(Notification::Dunning {
                    to,
                    notice: DunningNotice {
                        amount: invoice.amount_due,
                        currency: invoice.currency.clone(),
                        portal_url,
                        attempt: invoice.attempt_count,
                    },
                })
            }
            None => None,
        };

        Ok(Effects {
            changes: Reconciliation {
                subscription: Some(SubscriptionUpdate {
                    key: SubscriptionKey::Id(subscription.id),
                    patch: SubscriptionPatch {
                        status: Some(SubscriptionStatus::PastDue),
                        ..Default::default()
                    },
                    only_if_status: None,
                }),
                payment: Some(payment),
            },
            notification,
        })
    }
}
