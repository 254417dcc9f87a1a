use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::User;
use crate::users::services::RegistrationOutcome;

/// Request body for registration, with an optional inviter code.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub referral_code: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub referral_code: String,
    pub points: i64,
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            referral_code: user.referral_code,
            points: user.points,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InviterInfo {
    pub id: Uuid,
    pub name: String,
}

/// Response returned after registration.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: PublicUser,
    pub referral_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_given: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviter: Option<InviterInfo>,
}

impl From<RegistrationOutcome> for RegisterResponse {
    fn from(outcome: RegistrationOutcome) -> Self {
        let user = PublicUser::from(outcome.user);
        match outcome.referral {
            Some(applied) => Self {
                user,
                referral_applied: true,
                points_given: Some(applied.points_given),
                inviter: Some(InviterInfo {
                    id: applied.inviter_id,
                    name: applied.inviter_name,
                }),
            },
            None => Self {
                user,
                referral_applied: false,
                points_given: None,
                inviter: None,
            },
        }
    }
}

/// Response for the referral-code lookup endpoint.
#[derive(Debug, Serialize)]
pub struct CodeOwner {
    pub id: Uuid,
    pub name: String,
    pub referral_code: String,
}
