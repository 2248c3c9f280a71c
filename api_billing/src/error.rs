use actix_web::{HttpResponse, http::StatusCode};
use common::error::AppError;
use thiserror::Error;

/// Failure modes of webhook ingestion. Client-side failures are answered
/// with 400 so Stripe stops retrying; handler failures return 500 so the
/// event is delivered again.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("{0}")]
    Validation(String),

    #[error("Webhook error: {0}")]
    Authentication(String),

    #[error("Webhook handler failed: {0}")]
    Handler(#[from] AppError),
}

impl WebhookError {
    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            WebhookError::Validation(message) => {
                log::warn!("Rejected webhook payload: {}", message);
                HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
            }
            WebhookError::Authentication(_) => {
                log::warn!("{}", self);
                HttpResponse::BadRequest().json(serde_json::json!({ "error": self.to_string() }))
            }
            WebhookError::Handler(error) => {
                log::error!("Webhook handler error: {}", error);
                HttpResponse::InternalServerError()
                    .json(serde_json::json!({ "error": "Webhook handler failed" }))
            }
        }
    }
}

impl actix_web::ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::Validation(_) | WebhookError::Authentication(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.to_http_response()
    }
}
