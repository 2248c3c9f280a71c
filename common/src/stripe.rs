use std::collections::HashMap;

use stripe::{Client, CreateCustomer, Customer};

use crate::error::{AppError, Res};

pub fn create_client(secret_key: &str) -> Client {
    Client::new(secret_key)
}

/// Creates a Stripe customer tagged with the owning user id, so that
/// dashboard lookups can be traced back to a local account.
pub async fn create_customer(
    client: &Client,
    email: &str,
    name: Option<&str>,
    user_id: &str,
) -> Res<Customer> {
    let metadata = HashMap::from([("userId".to_string(), user_id.to_string())]);
    let params = CreateCustomer {
        email: Some(email),
        name,
        metadata: Some(metadata),
        ..Default::default()
    };

    Customer::create(client, params)
        .await
        .map_err(AppError::from)
}
