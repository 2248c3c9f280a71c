use std::sync::Arc;

use async_trait::async_trait;
use common::error::{AppError, Res};
use db::{
    dtos::subscription::SubscriptionKey,
    models::{subscription::Subscription, user::User},
};
use sqlx::PgPool;

use super::{AccountProfile, BillingStore, CommitOutcome, Reconciliation};

pub struct PgBillingStore {
    pool: Arc<PgPool>,
}

impl PgBillingStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        PgBillingStore { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn is_event_processed(&self, event_id: &str) -> Res<bool> {
        db::event::exists_event(&*self.pool, event_id).await
    }

    async fn find_user(&self, user_id: &str) -> Res<Option<User>> {
        db::user::get_user_by_id(&*self.pool, user_id).await
    }

    async fn find_subscription_by_user(&self, user_id: &str) -> Res<Option<Subscription>> {
        db::subscription::get_subscription_by_user(&*self.pool, user_id).await
    }

    async fn find_subscription_by_customer(
        &self,
        customer_id: &str,
    ) -> Res<Option<Subscription>> {
        db::subscription::get_subscription_by_customer(&*self.pool, customer_id).await
    }

    async fn ensure_account(&self, profile: &AccountProfile) -> Res<Subscription> {
        let mut tx = self.pool.begin().await?;
        db::user::upsert_user(
            &mut *tx,
            &profile.user_id,
            &profile.email,
            profile.name.as_deref(),
        )
        .await?;
        db::subscription::insert_free_subscription(&mut *tx, &profile.user_id).await?;
        let subscription = db::subscription::get_subscription_by_user(&mut *tx, &profile.user_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("Subscription for {} vanished", profile.user_id))
            })?;
        tx.commit().await?;
        Ok(subscription)
    }

    async fn assign_customer_id(&self, user_id: &str, customer_id: &str) -> Res<String> {
        if db::subscription::set_customer_id_if_absent(&*self.pool, user_id, customer_id).await? {
            return Ok(customer_id.to_string());
        }

        // a concurrent checkout stored its customer first
        db::subscription::get_subscription_by_user(&*self.pool, user_id)
            .await?
            .and_then(|sub| sub.stripe_customer_id)
            .ok_or_else(|| AppError::NotFound(format!("No subscription for user {}", user_id)))
    }

    async fn commit(
        &self,
        event_id: &str,
        event_type: &str,
        changes: &Reconciliation,
    ) -> Res<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        if !db::event::claim_event(&mut *tx, event_id, event_type).await? {
            tx.rollback().await?;
            return Ok(CommitOutcome::Duplicate);
        }

        if let Some(update) = changes.subscription.as_ref().filter(|u| !u.patch.is_empty()) {
            if let SubscriptionKey::UserId(user_id) = &update.key {
                db::subscription::insert_free_subscription(&mut *tx, user_id).await?;
            }
            let rows = db::subscription::update_subscription(&mut *tx, update).await?;
            if rows == 0 && update.only_if_status.is_none() {
                return Err(AppError::Internal(format!(
                    "Subscription {:?} not found while applying {}",
                    update.key, event_id
                )));
            }
        }

        if let Some(payment) = &changes.payment {
            if let Err(e) = db::payment::insert_payment(&mut *tx, payment).await {
                if e.is_unique_violation() {
                    tx.rollback().await?;
                    return Ok(CommitOutcome::Duplicate);
                }
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(CommitOutcome::Applied)
    }
}
