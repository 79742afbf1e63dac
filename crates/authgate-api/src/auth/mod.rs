//! Authentication module
//!
//! - Token codec for RS256 ID tokens and HS256 refresh tokens
//! - Credential store tracking which refresh tokens are live
//! - Token service owning issuance, rotation and revocation
//! - Middleware gating protected routes
//! - Account service, repositories and Argon2 password hashing

pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod service;
pub mod store;
pub mod users;

pub use jwt::{IdTokenKeys, JwtError};
pub use middleware::{auth_middleware, AuthenticatedUser, GateRejection, GateState};
pub use models::{RefreshToken, TokenPair};
pub use password::{Argon2Hasher, PasswordConfig};
pub use repository::{MemoryUserRepository, PgUserRepository};
pub use service::TokenService;
pub use store::{CredentialStore, MemoryCredentialStore, PgCredentialStore, StoreError};
pub use users::{DetailsUpdate, UserService};
