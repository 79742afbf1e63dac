//! Authentication API handlers
//!
//! Account creation, sign-in, token rotation and sign-out.
//!
//! Author: hephaex@gmail.com

use crate::auth::models::{
    CredentialsRequest, MessageResponse, TokensRequest, TokensResponse,
};
use crate::audit::extract_ip_address;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::state::AppState;
use authgate_core::AuthError;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

/// Create an account and issue its first token pair
///
/// # Responses
///
/// * `201 Created` - Account created, returns tokens
/// * `400 Bad Request` - Invalid email or password length
/// * `409 Conflict` - Email already registered
#[utoipa::path(
    post,
    path = "/api/account/signup",
    tag = "account",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Account created", body = TokensResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let user = state
        .user_service
        .signup(
            &request.email,
            &request.password,
            extract_ip_address(&headers),
        )
        .await?;
    let tokens = state.token_service.issue_pair(&user, None).await?;

    Ok((StatusCode::CREATED, Json(TokensResponse { tokens })))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/api/account/signin",
    tag = "account",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Signed in", body = TokensResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn signin_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let user = state
        .user_service
        .signin(
            &request.email,
            &request.password,
            extract_ip_address(&headers),
        )
        .await?;
    let tokens = state.token_service.issue_pair(&user, None).await?;

    Ok(Json(TokensResponse { tokens }))
}

/// Exchange a refresh token for a new pair
///
/// The presented refresh token is consumed: presenting it again fails
/// even if it has not expired.
#[utoipa::path(
    post,
    path = "/api/account/tokens",
    tag = "account",
    request_body = TokensRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokensResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid, expired or reused refresh token", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn tokens_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokensRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let refresh = state
        .token_service
        .validate_refresh_token(&request.refresh_token)?;

    let user = match state.user_service.get(refresh.uid).await {
        Ok(user) => user,
        Err(AuthError::NotFound(_)) => {
            tracing::warn!(uid = %refresh.uid, "refresh token subject no longer exists");
            return Err(AuthError::authorization(
                crate::auth::service::INVALID_CREDENTIAL,
            )
            .into());
        }
        Err(e) => return Err(e.into()),
    };

    let previous = refresh.id.to_string();
    let tokens = state
        .token_service
        .issue_pair(&user, Some(&previous))
        .await?;

    Ok(Json(TokensResponse { tokens }))
}

/// Revoke every refresh token of the current user
#[utoipa::path(
    post,
    path = "/api/account/signout",
    tag = "account",
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
        (status = 400, description = "Malformed authorization header", body = crate::error::ApiError),
        (status = 401, description = "Invalid or expired credential", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn signout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    state.token_service.sign_out(user.uid).await?;

    Ok(Json(MessageResponse {
        message: "user signed out successfully".to_string(),
    }))
}
