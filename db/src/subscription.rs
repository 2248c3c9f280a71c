use common::error::{AppError, Res};
use sqlx::{Executor, Postgres, QueryBuilder};

use crate::{
    dtos::subscription::{SubscriptionKey, SubscriptionUpdate},
    models::subscription::Subscription,
};

pub async fn get_subscription_by_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &str,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_subscription_by_customer<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    customer_id: &str,
) -> Res<Option<Subscription>> {
    sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE stripe_customer_id = $1")
        .bind(customer_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

/// Inserts the FREE/ACTIVE row for a user unless one exists. The unique
/// `user_id` constraint makes concurrent calls converge on a single row.
pub async fn insert_free_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &str,
) -> Res<()> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions (user_id)
        VALUES ($1)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(executor)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

/// Sets the Stripe customer id only when none is stored yet.
/// Returns `true` when this call wrote it.
pub async fn set_customer_id_if_absent<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &str,
    customer_id: &str,
) -> Res<bool> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET stripe_customer_id = $2, updated_at = NOW()
        WHERE user_id = $1 AND stripe_customer_id IS NULL
        "#,
    )
    .bind(user_id)
    .bind(customer_id)
    .execute(executor)
    .await
    .map_err(AppError::from)?;

    Ok(result.rows_affected() == 1)
}

/// Applies a column-level patch in a single UPDATE, so concurrent updates
/// touching different columns of the same row don't overwrite each other.
/// Returns the number of rows changed.
pub async fn update_subscription<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    update: &SubscriptionUpdate,
) -> Res<u64> {
    let patch = &update.patch;
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE subscriptions SET updated_at = NOW()");

    if let Some(plan) = patch.plan {
        qb.push(", plan = ").push_bind(plan);
    }
    if let Some(status) = patch.status {
        qb.push(", status = ").push_bind(status);
    }
    if let Some(customer_id) = &patch.stripe_customer_id {
        qb.push(", stripe_customer_id = ").push_bind(customer_id.clone());
    }
    if let Some(subscription_id) = &patch.stripe_subscription_id {
        qb.push(", stripe_subscription_id = ")
            .push_bind(subscription_id.clone());
    }
    if let Some(price_id) = &patch.stripe_price_id {
        qb.push(", stripe_price_id = ").push_bind(price_id.clone());
    }
    if let Some(period_end) = patch.stripe_current_period_end {
        qb.push(", stripe_current_period_end = ").push_bind(period_end);
    }
    if let Some(cancel) = patch.stripe_cancel_at_period_end {
        qb.push(", stripe_cancel_at_period_end = ").push_bind(cancel);
    }
    if let Some(trial_end) = patch.trial_ends_at {
        qb.push(", trial_ends_at = ").push_bind(trial_end);
    }
    if let Some(canceled_at) = patch.canceled_at {
        qb.push(", canceled_at = ").push_bind(canceled_at);
    }

    match &update.key {
        SubscriptionKey::UserId(user_id) => {
            qb.push(" WHERE user_id = ").push_bind(user_id.clone());
        }
        SubscriptionKey::Id(id) => {
            qb.push(" WHERE id = ").push_bind(*id);
        }
    }

    if let Some(status) = update.only_if_status {
        qb.push(" AND status = ").push_bind(status);
    }

    let result = qb.build().execute(executor).await.map_err(AppError::from)?;
    Ok(result.rows_affected())
}
