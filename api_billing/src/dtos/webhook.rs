use serde::Serialize;

use crate::services::reconciler::ReconcileOutcome;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<&'static str>,
}

impl From<&ReconcileOutcome> for WebhookAck {
    fn from(outcome: &ReconcileOutcome) -> Self {
        WebhookAck {
            received: true,
            skipped: match outcome {
                ReconcileOutcome::Skipped(reason) => Some(reason.as_str()),
                _ => None,
            },
        }
    }
}
