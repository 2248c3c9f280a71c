use std::sync::Arc;

use crate::{
    provider::BillingProvider, services::checkout::CheckoutSettings,
    services::reconciler::Reconciler, store::BillingStore,
};

/// Shared by every billing route; registered once as app data.
pub struct BillingState {
    pub reconciler: Reconciler,
    pub store: Arc<dyn BillingStore>,
    pub provider: Arc<dyn BillingProvider>,
    pub checkout: CheckoutSettings,
    pub portal_return_url: String,
}
