use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                   // unique user ID
    pub email: String,              // unique across all users
    pub name: String,               // display name
    pub referral_code: String,      // 8 chars over A-Z0-9, immutable once assigned
    pub points: i64,                // non-negative balance
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
