use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};

use crate::models::user::User;

pub async fn get_user_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &str,
) -> Res<Option<User>> {
    sqlx::query_as::<_, User>("SELECT id, email, name, created_at FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

/// Mirrors the identity issued by the auth service. Email and name are
/// refreshed on every call so billing emails go to the current address.
pub async fn upsert_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &str,
    email: &str,
    name: Option<&str>,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, name = EXCLUDED.name
        RETURNING id, email, name, created_at
        "#,
    )
    .bind(user_id)
    .bind(email)
    .bind(name)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}
