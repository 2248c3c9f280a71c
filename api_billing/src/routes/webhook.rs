use actix_web::{HttpRequest, HttpResponse, post, web};

use crate::{dtos::webhook::WebhookAck, error::WebhookError, state::BillingState};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receives Stripe webhook deliveries.
///
/// The body is taken as raw bytes; the signature covers the exact payload,
/// so it must not be re-serialized before verification.
///
/// # Output
/// - 200 `{"received": true}` once the event is reconciled, ignored or
///   acknowledged; `{"received": true, "skipped": "duplicate"}` on replays
/// - 400 when the signature is missing, invalid or stale, or the payload
///   is not an event
/// - 500 when reconciliation failed; Stripe will redeliver
#[post("")]
pub async fn post_webhook(
    req: HttpRequest,
    payload: web::Bytes,
    state: web::Data<BillingState>,
) -> Result<HttpResponse, WebhookError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.reconciler.handle_event(&payload, signature).await?;
    log::debug!("Webhook outcome: {:?}", outcome);
    Ok(HttpResponse::Ok().json(WebhookAck::from(&outcome)))
}
