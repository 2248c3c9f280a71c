use actix_web::web;

pub mod routes {
    pub mod billing;
    pub mod webhook;
}

pub mod services {
    pub mod checkout;
    pub mod reconciler;
    pub mod signature;
}

pub mod dtos {
    pub mod billing;
    pub mod webhook;
}

pub mod models {
    pub mod event;
}

pub mod error;
pub mod provider;
pub mod state;
pub mod store;

/// Authenticated billing endpoints; mount under `/api` behind the auth
/// middleware.
pub fn mount_billing() -> actix_web::Scope {
    web::scope("/billing")
        .service(routes::billing::post_checkout)
        .service(routes::billing::post_portal)
        .service(routes::billing::get_subscription)
}

/// Stripe's delivery endpoint. Registered ahead of the `/api` scope since
/// it authenticates by signature, not by bearer token.
pub fn mount_webhook() -> actix_web::Scope {
    web::scope("/api/billing/webhook").service(routes::webhook::post_webhook)
}
