use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::payment::PaymentStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCreateRequest {
    pub subscription_id: Uuid,
    /// Webhook event that produced the row; unique, doubles as idempotency key.
    pub stripe_event_id: String,
    pub stripe_invoice_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}
