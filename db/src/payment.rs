use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};

use crate::{dtos::payment::PaymentCreateRequest, models::payment::Payment};

pub async fn insert_payment<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: &PaymentCreateRequest,
) -> Res<Payment> {
    sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (subscription_id, stripe_event_id, stripe_invoice_id,
            stripe_payment_intent_id, amount, currency, status, paid_at, failure_reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(data.subscription_id)
    .bind(&data.stripe_event_id)
    .bind(&data.stripe_invoice_id)
    .bind(&data.stripe_payment_intent_id)
    .bind(data.amount)
    .bind(&data.currency)
    .bind(data.status)
    .bind(data.paid_at)
    .bind(&data.failure_reason)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}
