use common::{
    error::{AppError, Res},
    plans::{BillingInterval, Plan, PriceTable},
};

use crate::{
    provider::{BillingProvider, CheckoutSessionRequest},
    store::{AccountProfile, BillingStore},
};

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub prices: PriceTable,
    pub trial_period_days: u32,
    /// Public URL of the web app; checkout redirects land there.
    pub app_url: String,
}

/// Returns the customer id stored for the user, creating the Stripe
/// customer on first use.
pub async fn ensure_customer(
    store: &dyn BillingStore,
    provider: &dyn BillingProvider,
    profile: &AccountProfile,
) -> Res<String> {
    let subscription = store.ensure_account(profile).await?;
    if let Some(customer_id) = subscription.stripe_customer_id {
        return Ok(customer_id);
    }

    let created = provider
        .create_customer(&profile.email, profile.name.as_deref(), &profile.user_id)
        .await?;
    let stored = store.assign_customer_id(&profile.user_id, &created).await?;
    if stored != created {
        log::warn!(
            "Customer {} for user {} lost a race to {}",
            created,
            profile.user_id,
            stored
        );
    }
    Ok(stored)
}

/// Creates a hosted checkout session for a paid plan and returns its URL.
pub async fn create_checkout_url(
    store: &dyn BillingStore,
    provider: &dyn BillingProvider,
    settings: &CheckoutSettings,
    profile: &AccountProfile,
    plan: Plan,
    interval: BillingInterval,
) -> Res<String> {
    if !plan.is_paid() {
        return Err(AppError::BadRequest(format!(
            "Plan {} cannot be purchased",
            plan
        )));
    }
    let price_id = settings
        .prices
        .price_id(plan, interval)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "No {} price configured for plan {}",
                interval.as_str(),
                plan
            ))
        })?
        .to_string();

    let customer_id = ensure_customer(store, provider, profile).await?;

    let request = CheckoutSessionRequest {
        customer_id,
        price_id,
        user_id: profile.user_id.clone(),
        plan,
        interval,
        trial_period_days: settings.trial_period_days,
        success_url: format!("{}/dashboard?upgraded=1", settings.app_url),
        cancel_url: format!("{}/pricing?canceled=1", settings.app_url),
    };
    let url = provider.create_checkout_session(&request).await?;
    log::info!(
        "Created {} checkout for user {} ({})",
        plan,
        profile.user_id,
        interval.as_str()
    );
    Ok(url)
}

/// Returns a billing-portal URL for a user who already has a customer id.
pub async fn create_portal_url(
    store: &dyn BillingStore,
    provider: &dyn BillingProvider,
    return_url: &str,
    user_id: &str,
) -> Res<String> {
    let customer_id = store
        .find_subscription_by_user(user_id)
        .await?
        .and_then(|sub| sub.stripe_customer_id)
        .ok_or_else(|| AppError::NotFound("No subscription found".to_string()))?;

    provider.create_portal_session(&customer_id, return_url).await
}
