use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use common::error::{AppError, Res};
use db::{
    dtos::subscription::{SubscriptionKey, SubscriptionUpdate},
    models::{payment::Payment, subscription::Subscription, user::User},
};
use uuid::Uuid;

use super::{AccountProfile, BillingStore, CommitOutcome, Reconciliation};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    subscriptions: HashMap<String, Subscription>,
    payments: Vec<Payment>,
    processed: HashSet<String>,
}

impl State {
    fn subscription_mut(&mut self, key: &SubscriptionKey) -> Option<&mut Subscription> {
        match key {
            SubscriptionKey::UserId(user_id) => self.subscriptions.get_mut(user_id),
            SubscriptionKey::Id(id) => self.subscriptions.values_mut().find(|s| s.id == *id),
        }
    }
}

/// Process-local store with the same transactional guarantees as the
/// Postgres one. Backs the test suites and local runs without a database.
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<State>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Res<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("Billing store lock poisoned".to_string()))
    }

    pub fn insert_user(&self, user: User) -> Res<()> {
        self.lock()?.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn insert_subscription(&self, subscription: Subscription) -> Res<()> {
        self.lock()?
            .subscriptions
            .insert(subscription.user_id.clone(), subscription);
        Ok(())
    }

    pub fn subscription_for(&self, user_id: &str) -> Res<Option<Subscription>> {
        Ok(self.lock()?.subscriptions.get(user_id).cloned())
    }

    pub fn payments(&self) -> Res<Vec<Payment>> {
        Ok(self.lock()?.payments.clone())
    }

    pub fn processed_events(&self) -> Res<usize> {
        Ok(self.lock()?.processed.len())
    }
}

fn apply_update(state: &mut State, update: &SubscriptionUpdate) -> Res<()> {
    if let SubscriptionKey::UserId(user_id) = &update.key {
        if !state.users.contains_key(user_id) {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }
        state
            .subscriptions
            .entry(user_id.clone())
            .or_insert_with(|| Subscription::free(user_id));
    }

    let Some(subscription) = state.subscription_mut(&update.key) else {
        return match update.only_if_status {
            Some(_) => Ok(()),
            None => Err(AppError::Internal(format!(
                "Subscription {:?} not found",
                update.key
            ))),
        };
    };

    if update
        .only_if_status
        .is_none_or(|status| subscription.status == status)
    {
        update.patch.apply_to(subscription);
    }
    Ok(())
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn is_event_processed(&self, event_id: &str) -> Res<bool> {
        Ok(self.lock()?.processed.contains(event_id))
    }

    async fn find_user(&self, user_id: &str) -> Res<Option<User>> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }

    async fn find_subscription_by_user(&self, user_id: &str) -> Res<Option<Subscription>> {
        self.subscription_for(user_id)
    }

    async fn find_subscription_by_customer(
        &self,
        customer_id: &str,
    ) -> Res<Option<Subscription>> {
        Ok(self
            .lock()?
            .subscriptions
            .values()
            .find(|s| s.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn ensure_account(&self, profile: &AccountProfile) -> Res<Subscription> {
        let mut state = self.lock()?;
        let created_at = state
            .users
            .get(&profile.user_id)
            .map(|user| user.created_at)
            .unwrap_or_else(Utc::now);
        state.users.insert(
            profile.user_id.clone(),
            User {
                id: profile.user_id.clone(),
                email: profile.email.clone(),
                name: profile.name.clone(),
                created_at,
            },
        );
        Ok(state
            .subscriptions
            .entry(profile.user_id.clone())
            .or_insert_with(|| Subscription::free(&profile.user_id))
            .clone())
    }

    async fn assign_customer_id(&self, user_id: &str, customer_id: &str) -> Res<String> {
        let mut state = self.lock()?;
        let subscription = state
            .subscriptions
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("No subscription for user {}", user_id)))?;
        Ok(subscription
            .stripe_customer_id
            .get_or_insert_with(|| customer_id.to_string())
            .clone())
    }

    async fn commit(
        &self,
        event_id: &str,
        event_type: &str,
        changes: &Reconciliation,
    ) -> Res<CommitOutcome> {
        let mut state = self.lock()?;
        if state.processed.contains(event_id) {
            return Ok(CommitOutcome::Duplicate);
        }
        if let Some(payment) = &changes.payment {
            if state
                .payments
                .iter()
                .any(|p| p.stripe_event_id == payment.stripe_event_id)
            {
                return Ok(CommitOutcome::Duplicate);
            }
        }

        // restored on failure so a rejected commit leaves nothing behind
        let snapshot = state.subscriptions.clone();
        if let Some(update) = changes.subscription.as_ref().filter(|u| !u.patch.is_empty()) {
            if let Err(e) = apply_update(&mut state, update) {
                state.subscriptions = snapshot;
                return Err(e);
            }
        }

        if let Some(payment) = &changes.payment {
            if !state
                .subscriptions
                .values()
                .any(|s| s.id == payment.subscription_id)
            {
                state.subscriptions = snapshot;
                return Err(AppError::Internal(format!(
                    "Payment references unknown subscription {}",
                    payment.subscription_id
                )));
            }
            state.payments.push(Payment {
                id: Uuid::new_v4(),
                subscription_id: payment.subscription_id,
                stripe_event_id: payment.stripe_event_id.clone(),
                stripe_invoice_id: payment.stripe_invoice_id.clone(),
                stripe_payment_intent_id: payment.stripe_payment_intent_id.clone(),
                amount: payment.amount,
                currency: payment.currency.clone(),
                status: payment.status,
                paid_at: payment.paid_at,
                failure_reason: payment.failure_reason.clone(),
                created_at: Utc::now(),
            });
        }

        log::debug!("Recorded {} ({})", event_id, event_type);
        state.processed.insert(event_id.to_string());
        Ok(CommitOutcome::Applied)
    }
}
