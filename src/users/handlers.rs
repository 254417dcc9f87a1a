use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::users::{
    dto::{CodeOwner, PublicUser, RegisterRequest, RegisterResponse},
    repo,
    services::{self, RegisterError},
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/:id", get(get_user))
        .route("/users/referral-code/:code", get(get_user_by_code))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();

    match services::register_with_referral(
        state.store.as_ref(),
        &payload.email,
        &payload.name,
        payload.referral_code.as_deref(),
    )
    .await
    {
        Ok(outcome) => {
            info!(
                user_id = %outcome.user.id,
                email = %outcome.user.email,
                referral_applied = outcome.referral.is_some(),
                "user registered"
            );
            Ok((StatusCode::CREATED, Json(RegisterResponse::from(outcome))))
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = ?e, "registration failed");
                Err((status, "Registration failed".into()))
            } else {
                warn!(error = %e, "registration rejected");
                Err((status, e.to_string()))
            }
        }
    }
}

fn status_for(e: &RegisterError) -> StatusCode {
    match e {
        RegisterError::MissingFields
        | RegisterError::InvalidEmail
        | RegisterError::InvalidReferralCode
        | RegisterError::SelfReferral => StatusCode::BAD_REQUEST,
        RegisterError::EmailAlreadyExists => StatusCode::CONFLICT,
        RegisterError::CodeGenerationExhausted | RegisterError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = repo::find_by_id(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    Ok(Json(PublicUser::from(user)))
}

#[instrument(skip(state))]
pub async fn get_user_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<CodeOwner>, (StatusCode, String)> {
    let user = repo::find_by_code(&state.db, &code)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Invalid referral code".to_string()))?;

    Ok(Json(CodeOwner {
        id: user.id,
        name: user.name,
        referral_code: user.referral_code,
    }))
}

pub(crate) fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = ?e, "storage error");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
}
