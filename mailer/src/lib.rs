//! Outbound notification emails for billing events.
//!
//! The reconciler only sees the [`Mailer`] trait. [`ResendMailer`] talks
//! to the Resend HTTP API; [`LogMailer`] writes the rendered email to the
//! log and is used when no API key is configured.

use async_trait::async_trait;
use common::error::Res;

pub mod resend;
pub mod templates;

pub use resend::{LogMailer, ResendMailer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub name: Option<String>,
}

impl Recipient {
    pub fn greeting_name(&self) -> &str {
        self.name.as_deref().unwrap_or("there")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DunningNotice {
    pub amount: i64,
    pub currency: String,
    pub portal_url: String,
    /// Stripe's `attempt_count` for the invoice, passed through unchanged.
    pub attempt: u32,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, to: &Recipient, plan_name: &str) -> Res<()>;

    async fn send_dunning(&self, to: &Recipient, notice: &DunningNotice) -> Res<()>;
}
