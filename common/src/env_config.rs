use std::{env, sync::Arc};

use crate::plans::{PlanPrices, PriceTable};

#[derive(Clone, Debug)]
/// Configuration struct for the billing server.
///
/// Holds everything needed to boot the service: database and HTTP
/// settings, CORS and logging preferences, the JWT secret shared with
/// the auth service, Stripe credentials and price ids, and the
/// outbound email settings.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to.
    pub database_url: String,
    /// Configuration for JWT (JSON Web Token) validation.
    pub jwt_config: JwtConfig,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// The allowed origin for CORS (Cross-Origin Resource Sharing).
    pub cors_allowed_origin: String,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// Public URL of the web application, used for redirects and email links.
    pub app_url: String,
    /// Product name shown in email subjects.
    pub app_name: String,
    /// Stripe secret key
    pub stripe_secret_key: String,
    /// Stripe webhook secret
    pub stripe_webhook_secret: String,
    /// Maximum age of a webhook signature timestamp, in seconds.
    pub stripe_webhook_tolerance_secs: i64,
    /// Stripe price ids per plan and interval.
    pub price_table: PriceTable,
    /// Trial length granted on checkout.
    pub trial_period_days: u32,
    pub mail: MailConfig,
}

#[derive(Clone, Debug)]
/// Configuration for JSON Web Token (JWT) validation.
pub struct JwtConfig {
    /// The secret key used to verify JWTs.
    pub secret: String,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    /// Resend API key. Empty means emails are only logged.
    pub resend_api_key: String,
    pub from_email: String,
}

impl JwtConfig {
    /// Reads `JWT_SECRET`, shared with the auth service that issues tokens.
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        JwtConfig {
            secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
        }
    }
}

fn price_pair(plan: &str) -> PlanPrices {
    PlanPrices {
        monthly: env::var(format!("STRIPE_{plan}_MONTHLY_PRICE_ID")).unwrap_or_default(),
        yearly: env::var(format!("STRIPE_{plan}_YEARLY_PRICE_ID")).unwrap_or_default(),
    }
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `ENVIRONMENT`: `development` or `production`
    /// - `DATABASE_URL`: Connection string for the database
    /// - `JWT_SECRET`: Secret shared with the auth service
    /// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`
    ///
    /// Optional (with defaults):
    /// - `IP` ("127.0.0.1"), `PORT` (8080), `WORKERS` (4)
    /// - `CORS_ALLOWED_ORIGIN` ("http://localhost:3000")
    /// - `ENABLE_CONSOLE_LOGGING` (true)
    /// - `APP_URL` ("http://localhost:3000"), `APP_NAME` ("DocuForge")
    /// - `STRIPE_WEBHOOK_TOLERANCE_SECS` (300), `TRIAL_PERIOD_DAYS` (14)
    /// - `STRIPE_{STARTER,PRO,BUSINESS}_{MONTHLY,YEARLY}_PRICE_ID` (empty)
    /// - `RESEND_API_KEY` (empty), `FROM_EMAIL` ("noreply@docuforge.app")
    ///
    /// # Panics
    ///
    /// Panics if a required variable is missing.
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();

        Arc::new(Config {
            environment: env::var("ENVIRONMENT").expect("ENVIRONMENT must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_config: JwtConfig::from_env(),
            server_host: env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            num_workers: env::var("WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(4),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            console_logging_enabled: env::var("ENABLE_CONSOLE_LOGGING")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            app_url: env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "DocuForge".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .expect("STRIPE_SECRET_KEY must be set"),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .expect("STRIPE_WEBHOOK_SECRET must be set"),
            stripe_webhook_tolerance_secs: env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            price_table: PriceTable {
                starter: price_pair("STARTER"),
                pro: price_pair("PRO"),
                business: price_pair("BUSINESS"),
            },
            trial_period_days: env::var("TRIAL_PERIOD_DAYS")
                .unwrap_or_else(|_| "14".to_string())
                .parse()
                .unwrap_or(14),
            mail: MailConfig {
                resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
                from_email: env::var("FROM_EMAIL")
                    .unwrap_or_else(|_| "noreply@docuforge.app".to_string()),
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Where Stripe's hosted pages send the user back to.
    pub fn billing_return_url(&self) -> String {
        format!("{}/settings/billing", self.app_url.trim_end_matches('/'))
    }
}
