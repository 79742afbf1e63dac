//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::auth_middleware;
use crate::handlers::{account, auth};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Account routes, mounted under `server.base_url`
pub fn account_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/signup", post(auth::signup_handler))
        .route("/signin", post(auth::signin_handler))
        .route("/tokens", post(auth::tokens_handler));

    // Protected routes (valid ID token required)
    let protected_routes = Router::new()
        .route("/signout", post(auth::signout_handler))
        .route("/me", get(account::me_handler))
        .route("/details", put(account::details_handler))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
