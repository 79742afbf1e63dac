//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{TokenService, UserService};
use authgate_core::config::AppConfig;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Token issuance, rotation and revocation
    pub token_service: TokenService,
    /// Account operations
    pub user_service: UserService,
}

impl AppState {
    pub fn new(config: AppConfig, token_service: TokenService, user_service: UserService) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            token_service,
            user_service,
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
