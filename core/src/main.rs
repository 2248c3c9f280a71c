mod cors;

use std::sync::Arc;

use actix_web::{
    App, HttpServer,
    web::{self},
};
use api_billing::{
    provider::{BillingProvider, StripeProvider},
    services::{
        checkout::CheckoutSettings,
        reconciler::{Reconciler, ReconcilerSettings},
    },
    state::BillingState,
    store::{BillingStore, PgBillingStore},
};
use common::env_config::Config;
use mailer::{LogMailer, Mailer, ResendMailer};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();
    let config_data = config.clone();
    let origin = config.cors_allowed_origin.clone();

    // init logger
    logger::setup().expect("Failed to set up logger");

    // init db connection
    let pool = db::setup(&config.database_url, config.is_production())
        .await
        .expect("Failed to set up database");

    // collaborators
    let store: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool));
    let provider: Arc<dyn BillingProvider> =
        Arc::new(StripeProvider::new(&config.stripe_secret_key));
    let mailer: Arc<dyn Mailer> = if config.mail.resend_api_key.is_empty() {
        log::warn!("RESEND_API_KEY is not set, billing emails will only be logged");
        Arc::new(LogMailer::new(&config.app_name, &config.app_url))
    } else {
        Arc::new(ResendMailer::new(&config))
    };

    let reconciler = Reconciler::new(
        ReconcilerSettings {
            webhook_secret: config.stripe_webhook_secret.clone(),
            tolerance_secs: config.stripe_webhook_tolerance_secs,
            prices: config.price_table.clone(),
            portal_return_url: config.billing_return_url(),
        },
        store.clone(),
        provider.clone(),
        mailer,
    );
    let billing = web::Data::new(BillingState {
        reconciler,
        store,
        provider,
        checkout: CheckoutSettings {
            prices: config.price_table.clone(),
            trial_period_days: config.trial_period_days,
            app_url: config.app_url.trim_end_matches('/').to_string(),
        },
        portal_return_url: config.billing_return_url(),
    });

    log::info!(
        "Starting billing server on {}:{} ({})",
        config.server_host,
        config.server_port,
        config.environment
    );

    HttpServer::new(move || {
        App::new()
            .app_data(billing.clone())
            .wrap(logger::middleware(config_data.console_logging_enabled)) // 2nd
            .wrap(cors::middleware(&origin)) // 1st
            // signature-authenticated, must precede the bearer-guarded scope
            .service(api_billing::mount_webhook())
            .service(
                web::scope("/api")
                    .wrap(api_auth::auth_middleware(config_data.clone()))
                    .service(api_billing::mount_billing()),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await
}
