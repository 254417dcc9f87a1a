use sqlx::PgPool;
use uuid::Uuid;

use crate::referrals::repo_types::ReferralWithInvitee;

/// List referrals made by an inviter, newest first, with the invitee
/// denormalized for display.
pub async fn list_by_inviter(
    db: &PgPool,
    inviter_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<ReferralWithInvitee>> {
    let rows = sqlx::query_as::<_, ReferralWithInvitee>(
        r#"
        SELECT r.id, r.inviter_id, r.invitee_id, r.invitee_referral_code,
               r.points_given, r.created_at,
               u.name AS invitee_name, u.email AS invitee_email
        FROM referrals r
        JOIN users u ON u.id = r.invitee_id
        WHERE r.inviter_id = $1
        ORDER BY r.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(inviter_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Count referrals made by an inviter.
pub async fn count_by_inviter(db: &PgPool, inviter_id: Uuid) -> anyhow::Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM referrals WHERE inviter_id = $1"#,
    )
    .bind(inviter_id)
    .fetch_one(db)
    .await?;
    Ok(count)
}
