use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::referrals::dto::{Pagination, ReferralListItem, ReferralStatsResponse};
use crate::referrals::repo;
use crate::state::AppState;
use crate::users;
use crate::users::handlers::internal;

pub fn referral_routes() -> Router<AppState> {
    Router::new()
        .route("/users/:id/referrals", get(list_referrals))
        .route("/users/:id/referral-stats", get(referral_stats))
}

#[instrument(skip(state))]
pub async fn list_referrals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<ReferralListItem>>, (StatusCode, String)> {
    users::repo::find_by_id(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    let rows = repo::list_by_inviter(&state.db, id, p.limit, p.offset)
        .await
        .map_err(internal)?;

    let items = rows
        .into_iter()
        .map(|r| ReferralListItem {
            id: r.id,
            invitee_id: r.invitee_id,
            invitee_name: r.invitee_name,
            invitee_email: r.invitee_email,
            points_given: r.points_given,
            created_at: r.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn referral_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReferralStatsResponse>, (StatusCode, String)> {
    let user = users::repo::find_by_id(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    let referral_count = repo::count_by_inviter(&state.db, id)
        .await
        .map_err(internal)?;

    Ok(Json(ReferralStatsResponse {
        referral_count,
        points: user.points,
    }))
}
