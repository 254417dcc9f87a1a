use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::users::repo_types::User;

/// Storage faults the registration flow needs to tell apart. Unique-constraint
/// races surface as their own variants so callers never have to inspect a raw
/// driver error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("referral code already assigned")]
    DuplicateCode,
    #[error("invitee already has a referral recorded")]
    DuplicateInvitee,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// One transactional scope. Reads observe the session's own uncommitted
/// writes. Dropping a session without `commit` discards everything it wrote,
/// including sessions abandoned mid-request.
#[async_trait]
pub trait StoreSession: Send {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_code(&mut self, code: &str) -> Result<Option<User>, StoreError>;
    async fn referral_code_exists(&mut self, code: &str) -> Result<bool, StoreError>;
    async fn insert_user(
        &mut self,
        email: &str,
        name: &str,
        referral_code: &str,
    ) -> Result<User, StoreError>;
    async fn add_points(&mut self, user_id: Uuid, amount: i64) -> Result<(), StoreError>;
    async fn insert_referral(
        &mut self,
        inviter_id: Uuid,
        invitee_id: Uuid,
        presented_code: &str,
        points_given: i64,
    ) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(PgSession { tx }))
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, referral_code, points, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(user)
    }

    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, referral_code, points, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(user)
    }

    async fn find_user_by_code(&mut self, code: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, referral_code, points, created_at, updated_at
            FROM users
            WHERE referral_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(user)
    }

    async fn referral_code_exists(&mut self, code: &str) -> Result<bool, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM users WHERE referral_code = $1"#,
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(id.is_some())
    }

    async fn insert_user(
        &mut self,
        email: &str,
        name: &str,
        referral_code: &str,
    ) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, referral_code)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, referral_code, points, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(name)
        .bind(referral_code)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(user)
    }

    async fn add_points(&mut self, user_id: Uuid, amount: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET points = points + $1, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "add_points: user {user_id} not found"
            )));
        }
        Ok(())
    }

    async fn insert_referral(
        &mut self,
        inviter_id: Uuid,
        invitee_id: Uuid,
        presented_code: &str,
        points_given: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO referrals (inviter_id, invitee_id, invitee_referral_code, points_given)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(inviter_id)
        .bind(invitee_id)
        .bind(presented_code)
        .bind(points_given)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(classify)
    }
}

fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.constraint() {
            Some("users_email_key") => return StoreError::DuplicateEmail,
            Some("users_referral_code_key") => return StoreError::DuplicateCode,
            Some("referrals_invitee_id_key") => return StoreError::DuplicateInvitee,
            _ => {}
        }
    }
    StoreError::Backend(e.into())
}
