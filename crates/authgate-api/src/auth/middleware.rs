/// Authentication gate for protected routes
///
/// Extracts the bearer ID token from the Authorization header, validates it
/// through the `TokenService` and binds the embedded user to the request.
/// Malformed headers are rejected before any token validation happens.
use crate::audit::extract_ip_address;
use crate::error::AppError;
use crate::state::AppState;
use authgate_core::{Result, User};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Message returned for a missing or malformed Authorization header
pub const MALFORMED_HEADER: &str = "malformed authorization header";

/// Authenticated user bound to the request by `auth_middleware`
///
/// Extract it in handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl std::ops::Deref for AuthenticatedUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

/// Why the gate refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// Header absent, not UTF-8 or not `Bearer <token>`
    MalformedHeader,
    /// Token failed signature or expiry checks
    InvalidCredential,
}

impl From<GateRejection> for AppError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::MalformedHeader => AppError::BadRequest(MALFORMED_HEADER.to_string()),
            GateRejection::InvalidCredential => {
                AppError::Unauthorized(super::service::INVALID_CREDENTIAL.to_string())
            }
        }
    }
}

/// Per-request gate state
///
/// `AwaitingCredential -> ParsingHeader -> Verifying -> {Bound, Rejected}`
#[derive(Debug, Clone)]
pub enum GateState {
    AwaitingCredential,
    ParsingHeader(String),
    Verifying(String),
    Bound(User),
    Rejected(GateRejection),
}

impl GateState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCredential => "awaiting_credential",
            Self::ParsingHeader(_) => "parsing_header",
            Self::Verifying(_) => "verifying",
            Self::Bound(_) => "bound",
            Self::Rejected(_) => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Bound(_) | Self::Rejected(_))
    }

    /// Advance one transition; terminal states are returned unchanged
    pub fn step<F>(self, headers: &HeaderMap, verify: &F) -> GateState
    where
        F: Fn(&str) -> Result<User>,
    {
        match self {
            Self::AwaitingCredential => match headers.get(header::AUTHORIZATION) {
                Some(value) => match value.to_str() {
                    Ok(raw) => Self::ParsingHeader(raw.to_string()),
                    Err(_) => Self::Rejected(GateRejection::MalformedHeader),
                },
                None => Self::Rejected(GateRejection::MalformedHeader),
            },
            Self::ParsingHeader(raw) => match parse_bearer(&raw) {
                Some(token) => Self::Verifying(token.to_string()),
                None => Self::Rejected(GateRejection::MalformedHeader),
            },
            Self::Verifying(token) => match verify(&token) {
                Ok(user) => Self::Bound(user),
                Err(_) => Self::Rejected(GateRejection::InvalidCredential),
            },
            terminal => terminal,
        }
    }
}

/// Split `Bearer <token>` into its token
///
/// Exactly two non-empty segments separated by a single space.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Drive the gate from `AwaitingCredential` to a terminal state
pub fn run_gate<F>(headers: &HeaderMap, verify: F) -> GateState
where
    F: Fn(&str) -> Result<User>,
{
    let mut state = GateState::AwaitingCredential;
    while !state.is_terminal() {
        let from = state.name();
        state = state.step(headers, &verify);
        tracing::debug!(from, to = state.name(), "auth gate transition");
    }
    state
}

/// Authentication middleware that requires a valid ID token
///
/// # Usage
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use authgate_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/me", get(me))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let outcome = run_gate(request.headers(), |token| {
        state.token_service.validate_id_token(token)
    });

    match outcome {
        GateState::Bound(user) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            Ok(next.run(request).await)
        }
        GateState::Rejected(rejection) => {
            tracing::warn!(
                ?rejection,
                path = %request.uri().path(),
                ip_address = ?extract_ip_address(request.headers()),
                "request rejected by auth gate"
            );
            Err(rejection.into())
        }
        other => Err(AppError::Internal(format!(
            "auth gate stopped in non-terminal state {}",
            other.name()
        ))),
    }
}
