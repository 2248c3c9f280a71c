use std::collections::HashMap;

use async_trait::async_trait;
use common::error::{AppError, Res};
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionBillingAddressCollection,
    CheckoutSessionMode, Client, CreateBillingPortalSession, CreateCheckoutSession,
    CreateCheckoutSessionAutomaticTax, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentMethodTypes, CreateCheckoutSessionSubscriptionData,
    CreateCheckoutSessionTaxIdCollection, CustomerId, Subscription, SubscriptionId,
};

use super::{BillingProvider, CheckoutSessionRequest, ProviderSubscription};

pub struct StripeProvider {
    client: Client,
}

impl StripeProvider {
    pub fn new(secret_key: &str) -> Self {
        StripeProvider {
            client: common::stripe::create_client(secret_key),
        }
    }
}

fn parse_customer_id(customer_id: &str) -> Res<CustomerId> {
    customer_id.parse::<CustomerId>().map_err(|e| {
        AppError::Internal(format!(
            "Failed to parse customer id: {}. {}",
            customer_id, e
        ))
    })
}

/// Metadata attached to both the checkout session and the subscription it
/// creates, so later subscription events can be traced to the user.
fn checkout_metadata(request: &CheckoutSessionRequest) -> HashMap<String, String> {
    HashMap::from([
        ("userId".to_string(), request.user_id.clone()),
        ("plan".to_string(), request.plan.as_str().to_string()),
        ("interval".to_string(), request.interval.as_str().to_string()),
    ])
}

#[async_trait]
impl BillingProvider for StripeProvider {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Res<ProviderSubscription> {
        let id = subscription_id.parse::<SubscriptionId>().map_err(|e| {
            AppError::Internal(format!(
                "Failed to parse subscription id: {}. {}",
                subscription_id, e
            ))
        })?;
        let sub = Subscription::retrieve(&self.client, &id, &[]).await?;

        Ok(ProviderSubscription {
            id: sub.id.to_string(),
            status: sub.status.as_str().to_string(),
            price_id: sub
                .items
                .data
                .first()
                .and_then(|item| item.price.as_ref())
                .map(|price| price.id.to_string()),
            current_period_end: Some(sub.current_period_end),
            trial_end: sub.trial_end,
            cancel_at_period_end: sub.cancel_at_period_end,
        })
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Res<String> {
        let mut params = CreateBillingPortalSession::new(parse_customer_id(customer_id)?);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(&self.client, params).await?;
        Ok(session.url)
    }

    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        user_id: &str,
    ) -> Res<String> {
        let customer = common::stripe::create_customer(&self.client, email, name, user_id).await?;
        Ok(customer.id.to_string())
    }

    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Res<String> {
        let params = CreateCheckoutSession {
            payment_method_types: Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            mode: Some(CheckoutSessionMode::Subscription),
            success_url: Some(request.success_url.as_str()),
            cancel_url: Some(request.cancel_url.as_str()),
            customer: Some(parse_customer_id(&request.customer_id)?),
            allow_promotion_codes: Some(true),
            billing_address_collection: Some(CheckoutSessionBillingAddressCollection::Required),
            tax_id_collection: Some(CreateCheckoutSessionTaxIdCollection {
                enabled: true,
                ..Default::default()
            }),
            automatic_tax: Some(CreateCheckoutSessionAutomaticTax {
                enabled: true,
                ..Default::default()
            }),
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                trial_period_days: Some(request.trial_period_days),
                metadata: Some(checkout_metadata(request)),
                ..Default::default()
            }),
            metadata: Some(checkout_metadata(request)),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params).await?;
        session
            .url
            .ok_or_else(|| AppError::Internal("Checkout session has no URL".to_string()))
    }
}
