//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO (or WARN for suspected abuse) with
//! the "audit" target, making them easy to filter and route to security
//! monitoring systems.
//!
//! # Example
//!
//! ```ignore
//! use authgate_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::SigninSuccess {
//!     user_id: user.uid,
//!     email: user.email.clone(),
//!     ip_address: Some("192.168.1.1".to_string()),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Security audit events for authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// New account created
    Signup {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
    },

    /// Successful email/password sign-in
    SigninSuccess {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
    },

    /// Failed email/password sign-in
    SigninFailure {
        email: String,
        ip_address: Option<String>,
    },

    /// Refresh token exchanged for a new pair
    TokenRotation { user_id: Uuid, token_id: Uuid },

    /// Rotation attempted with a refresh token that is no longer live
    RefreshReuse { user_id: Uuid, token_id: String },

    /// All refresh tokens of a user revoked
    Signout { user_id: Uuid, revoked: u64 },

    /// Invalid or expired token used
    ///
    /// The auth gate logs the client address of a rejected request itself.
    InvalidToken { kind: String, reason: String },
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::Signup {
            user_id,
            email,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                ip_address = ?ip_address,
                "User signup"
            );
        }
        AuditEvent::SigninSuccess {
            user_id,
            email,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                ip_address = ?ip_address,
                "Signin successful"
            );
        }
        AuditEvent::SigninFailure { email, ip_address } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                ip_address = ?ip_address,
                "Signin failed"
            );
        }
        AuditEvent::TokenRotation { user_id, token_id } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                token_id = %token_id,
                "Refresh token rotated"
            );
        }
        AuditEvent::RefreshReuse { user_id, token_id } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                token_id = %token_id,
                "Refresh token reuse or revoked token presented"
            );
        }
        AuditEvent::Signout { user_id, revoked } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                revoked = %revoked,
                "User signout"
            );
        }
        AuditEvent::InvalidToken { kind, reason } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                kind = %kind,
                reason = %reason,
                "Invalid token"
            );
        }
    }
}

/// Extract client IP address from request headers
///
/// Checks `X-Forwarded-For` (first hop) then `X-Real-IP`.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let ip = first.trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
