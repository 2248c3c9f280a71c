use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};

pub async fn exists_event<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    event_id: &str,
) -> Res<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
    )
    .bind(event_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

/// Claims an event id. Returns `false` when the id was already recorded,
/// which callers treat as a duplicate delivery.
pub async fn claim_event<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    event_id: &str,
    event_type: &str,
) -> Res<bool> {
    let claimed: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO processed_events (event_id, event_type)
        VALUES ($1, $2)
        ON CONFLICT (event_id) DO NOTHING
        RETURNING event_id
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)?;

    Ok(claimed.is_some())
}
