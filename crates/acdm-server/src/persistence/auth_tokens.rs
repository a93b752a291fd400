//! Backend bearer token persistence.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

/// Store the token, replacing any previous one.
pub async fn save_token(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO auth_tokens (id, token, updated_at)
        VALUES (1, ?1, ?2)
        ON CONFLICT(id) DO UPDATE SET
            token = ?1,
            updated_at = ?2
        "#,
    )
    .bind(token)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_token(pool: &SqlitePool) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT token FROM auth_tokens WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(token,)| token))
}

/// Forget the stored token, e.g. after the backend rejected it.
pub async fn clear_token(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM auth_tokens").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    #[tokio::test]
    async fn token_is_replaced_and_cleared() {
        let db = init_database(":memory:", 1).await.unwrap();
        assert_eq!(load_token(db.pool()).await.unwrap(), None);

        save_token(db.pool(), "first").await.unwrap();
        save_token(db.pool(), "second").await.unwrap();
        assert_eq!(load_token(db.pool()).await.unwrap().as_deref(), Some("second"));

        clear_token(db.pool()).await.unwrap();
        assert_eq!(load_token(db.pool()).await.unwrap(), None);
    }
}
