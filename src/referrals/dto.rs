use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 {
    20
}

/// One entry in an inviter's referral list.
#[derive(Debug, Serialize)]
pub struct ReferralListItem {
    pub id: Uuid,
    pub invitee_id: Uuid,
    pub invitee_name: String,
    pub invitee_email: String,
    pub points_given: i64,
    pub created_at: OffsetDateTime,
}

/// Referral count plus the inviter's current point balance.
#[derive(Debug, Serialize)]
pub struct ReferralStatsResponse {
    pub referral_count: i64,
    pub points: i64,
}
