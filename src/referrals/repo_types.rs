use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// One successful invitation edge, joined with the invitee's name and email
/// for listing. Referral rows are immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralWithInvitee {
    pub id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_id: Uuid,
    pub invitee_referral_code: String, // the code string presented at registration
    pub points_given: i64,
    pub created_at: OffsetDateTime,
    pub invitee_name: String,
    pub invitee_email: String,
}
