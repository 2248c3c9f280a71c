use async_trait::async_trait;
use common::{
    env_config::Config,
    error::{AppError, Res},
};
use serde::Serialize;

use crate::{
    DunningNotice, Mailer, Recipient,
    templates::{self, RenderedEmail},
};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Sends email through the Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    app_name: String,
    app_url: String,
}

impl ResendMailer {
    pub fn new(config: &Config) -> Self {
        ResendMailer {
            client: reqwest::Client::new(),
            api_key: config.mail.resend_api_key.clone(),
            from: format!("{} <{}>", config.app_name, config.mail.from_email),
            app_name: config.app_name.clone(),
            app_url: config.app_url.clone(),
        }
    }

    async fn send(&self, to: &Recipient, email: RenderedEmail) -> Res<()> {
        let body = SendEmailRequest {
            from: &self.from,
            to: [to.email.as_str()],
            subject: &email.subject,
            html: &email.html,
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Resend rejected email ({}): {}",
                status, text
            )));
        }

        log::info!("Sent \"{}\" to {}", email.subject, to.email);
        Ok(())
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_welcome(&self, to: &Recipient, plan_name: &str) -> Res<()> {
        let email = templates::welcome(to, plan_name, &self.app_name, &self.app_url);
        self.send(to, email).await
    }

    async fn send_dunning(&self, to: &Recipient, notice: &DunningNotice) -> Res<()> {
        let email = templates::dunning(to, notice, &self.app_name);
        self.send(to, email).await
    }
}

/// Renders emails and writes them to the log instead of sending them.
pub struct LogMailer {
    app_name: String,
    app_url: String,
}

impl LogMailer {
    pub fn new(app_name: &str, app_url: &str) -> Self {
        LogMailer {
            app_name: app_name.to_string(),
            app_url: app_url.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, to: &Recipient, plan_name: &str) -> Res<()> {
        let email = templates::welcome(to, plan_name, &self.app_name, &self.app_url);
        log::info!("[mail disabled] to={} subject=\"{}\"", to.email, email.subject);
        Ok(())
    }

    async fn send_dunning(&self, to: &Recipient, notice: &DunningNotice) -> Res<()> {
        let email = templates::dunning(to, notice, &self.app_name);
        log::info!("[mail disabled] to={} subject=\"{}\"", to.email, email.subject);
        Ok(())
    }
}
