//! Token and request/response models for the auth API
//!
//! - TokenPair: ID token plus refresh token returned by every issuance
//! - RefreshToken: a parsed (not necessarily live) refresh token
//! - Request bodies for signup, signin, token rotation and profile updates

use authgate_core::User;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Credential pair handed to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    /// RS256 ID token, presented as `Authorization: Bearer <id_token>`
    pub id_token: String,
    /// HS256 refresh token, exchanged at `/tokens`
    pub refresh_token: String,
}

/// Refresh token whose signature and expiry have been verified
///
/// Passing verification does not make it live: only a successful rotation
/// proves the store still holds its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    /// Token identifier (`jti`)
    pub id: Uuid,
    /// Owner
    pub uid: Uuid,
    /// The signed token string as presented
    pub token: String,
}

/// Email/password body shared by signup and signin
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CredentialsRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 6, max = 30, message = "must be 6 to 30 characters"))]
    pub password: String,
}

/// Token rotation request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct TokensRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub refresh_token: String,
}

/// Profile update request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DetailsRequest {
    #[validate(length(max = 50))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(url)]
    pub website: Option<String>,
}

/// `{ "tokens": { ... } }` response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokensResponse {
    pub tokens: TokenPair,
}

/// Public profile returned by `/me` and `/details`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub uid: Uuid,
    pub email: String,
    pub name: String,
    pub image_url: String,
    pub website: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            uid: user.uid,
            email: user.email,
            name: user.name,
            image_url: user.image_url,
            website: user.website,
        }
    }
}

/// `{ "user": { ... } }` response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user: UserProfile,
}

/// Plain message response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}
