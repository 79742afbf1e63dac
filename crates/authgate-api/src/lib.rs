//! AuthGate API - token issuance and authentication REST server
//!
//! Issues RS256 ID tokens and single-use HS256 refresh tokens, rotates and
//! revokes them through a credential store, and gates protected routes.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use axum::{error_handling::HandleErrorLayer, routing::get, BoxError, Json, Router};
use error::AppError;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower::{timeout::error::Elapsed, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Message returned when a request exceeds the handler timeout
pub const REQUEST_TIMED_OUT: &str = "request took too long to process";

/// OpenAPI document for the account API
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::signup_handler,
        handlers::auth::signin_handler,
        handlers::auth::tokens_handler,
        handlers::auth::signout_handler,
        handlers::account::me_handler,
        handlers::account::details_handler,
        handlers::health::health_check,
    ),
    components(schemas(
        auth::models::TokenPair,
        auth::models::CredentialsRequest,
        auth::models::TokensRequest,
        auth::models::DetailsRequest,
        auth::models::TokensResponse,
        auth::models::UserProfile,
        auth::models::UserResponse,
        auth::models::MessageResponse,
        handlers::health::HealthResponse,
        error::ApiError,
    )),
    tags(
        (name = "account", description = "Account and token endpoints"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Build the application router
///
/// Account routes are nested under `server.base_url`; every request is
/// bounded by the configured handler timeout.
pub fn create_router(state: Arc<AppState>) -> Router {
    let base_url = state.config.server.base_url.clone();
    let handler_timeout = state.config.server.handler_timeout();

    let router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest(&base_url, routes::account_routes(state.clone()));

    with_handler_timeout(router, handler_timeout)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer 503 for any request still running after `timeout`
pub fn with_handler_timeout<S>(router: Router<S>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_timeout_error))
            .layer(TimeoutLayer::new(timeout)),
    )
}

async fn handle_timeout_error(err: BoxError) -> AppError {
    if err.is::<Elapsed>() {
        tracing::warn!("request exceeded handler timeout");
        AppError::ServiceUnavailable(REQUEST_TIMED_OUT.to_string())
    } else {
        AppError::Internal(format!("unhandled middleware error: {err}"))
    }
}

/// Router over in-memory stores and fixture keys
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(testing::test_state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "done"
    }

    async fn fast() -> &'static str {
        "done"
    }

    fn bounded_router() -> Router {
        let router = Router::new()
            .route("/slow", get(slow))
            .route("/fast", get(fast));
        with_handler_timeout(router, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_handler_timeout_is_service_unavailable() {
        let response = bounded_router()
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
        assert_eq!(json["message"], REQUEST_TIMED_OUT);
    }

    #[tokio::test]
    async fn test_handler_within_timeout_succeeds() {
        let response = bounded_router()
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
