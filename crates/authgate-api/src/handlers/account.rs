//! Profile handlers for the signed-in user

use crate::auth::models::{DetailsRequest, UserResponse};
use crate::auth::{AuthenticatedUser, DetailsUpdate};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Extension, Json};
use std::sync::Arc;
use validator::Validate;

/// Get the current user's profile
///
/// The profile is read from storage, not from the token, so it reflects
/// updates made after the token was issued.
#[utoipa::path(
    get,
    path = "/api/account/me",
    tag = "account",
    responses(
        (status = 200, description = "Current user profile", body = UserResponse),
        (status = 401, description = "Invalid or expired credential", body = crate::error::ApiError),
        (status = 404, description = "User no longer exists", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.user_service.get(user.uid).await?;

    Ok(Json(UserResponse { user: user.into() }))
}

/// Update name, email or website of the current user
#[utoipa::path(
    put,
    path = "/api/account/details",
    tag = "account",
    request_body = DetailsRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid or expired credential", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn details_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<DetailsRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let updated = state
        .user_service
        .update_details(
            user.uid,
            DetailsUpdate {
                name: request.name,
                email: request.email,
                website: request.website,
            },
        )
        .await?;

    Ok(Json(UserResponse {
        user: updated.into(),
    }))
}
