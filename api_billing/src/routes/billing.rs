use actix_web::{Responder, get, post, web};
use common::{
    error::{AppError, Res},
    http::Success,
    jwt::JwtClaims,
    plans::Plan,
};

use crate::{
    dtos::billing::{CheckoutRequest, SubscriptionResponse, UrlResponse},
    services,
    state::BillingState,
    store::AccountProfile,
};

/// Starts a Stripe Checkout for a paid plan.
///
/// # Input
/// - `claims`: caller identity from the bearer token
/// - `req`: `{"plan": "starter" | "pro" | "business", "interval": "monthly" | "yearly"}`,
///   interval defaults to monthly
///
/// # Output
/// - Success: `{"url": "<hosted checkout page>"}`
/// - 400 for an unknown plan, FREE, or a price that is not configured
#[post("/checkout")]
pub async fn post_checkout(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<CheckoutRequest>,
    state: web::Data<BillingState>,
) -> Res<impl Responder> {
    let plan = req
        .plan
        .parse::<Plan>()
        .map_err(|_| AppError::BadRequest("Invalid plan".to_string()))?;

    let url = services::checkout::create_checkout_url(
        state.store.as_ref(),
        state.provider.as_ref(),
        &state.checkout,
        &AccountProfile::from(&*claims),
        plan,
        req.interval,
    )
    .await?;

    Success::ok(UrlResponse { url })
}

/// Opens the Stripe billing portal for the caller.
///
/// # Output
/// - Success: `{"url": "<hosted portal session>"}`
/// - 404 when the caller never started a checkout
#[post("/portal")]
pub async fn post_portal(
    claims: web::ReqData<JwtClaims>,
    state: web::Data<BillingState>,
) -> Res<impl Responder> {
    let url = services::checkout::create_portal_url(
        state.store.as_ref(),
        state.provider.as_ref(),
        &state.portal_return_url,
        &claims.user_id,
    )
    .await?;

    Success::ok(UrlResponse { url })
}

/// Current plan, status and the limits that come with the plan.
#[get("/subscription")]
pub async fn get_subscription(
    claims: web::ReqData<JwtClaims>,
    state: web::Data<BillingState>,
) -> Res<impl Responder> {
    let subscription = state
        .store
        .ensure_account(&AccountProfile::from(&*claims))
        .await?;

    Success::ok(SubscriptionResponse::from(subscription))
}
