use sqlx::PgPool;
use uuid::Uuid;

use crate::users::repo_types::User;

/// Find a user by id.
pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, referral_code, points, created_at, updated_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

/// Find a user by their referral code.
pub async fn find_by_code(db: &PgPool, code: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, name, referral_code, points, created_at, updated_at
        FROM users
        WHERE referral_code = $1
        "#,
    )
    .bind(code)
    .fetch_optional(db)
    .await?;
    Ok(user)
}
