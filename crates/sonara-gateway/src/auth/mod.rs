//! Authentication for the gateway.
//!
//! This module provides:
//! - Credential parsing and login validation
//! - JWT issuing with sliding expiration
//! - First-run bootstrap of the initial admin account
//! - Auth middleware for protected routes

mod config;
mod credentials;
mod handlers;
mod jwt;
mod middleware;
/// First-run setup and bootstrap management.
pub mod setup;
mod users;

pub use config::{AuthConfig, AuthConfigBuilder};
pub use credentials::Credentials;
pub use handlers::{LoginResponse, create_admin, login, setup_status};
pub use jwt::{Claims, JwtManager, TokenIssuer};
pub use middleware::{AuthState, CurrentUser, authenticate};
pub use setup::{BootstrapController, SetupStatus};
pub use users::{
    PropertyRepository, PublicUser, SledStore, User, UserRepository, validate_login,
};

use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Request body could not be parsed as a JSON object.
    #[error("Invalid request payload")]
    MalformedPayload,

    /// Unknown username or wrong password.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// No user exists yet; the client should run the setup flow.
    #[error("no users created")]
    BootstrapRequired,

    /// Token missing, malformed, expired or carrying no subject.
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// A valid token could not be re-signed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Admin creation attempted after bootstrap closed.
    #[error("Cannot create another first admin")]
    AdminExists,

    /// User already exists.
    #[error("User already exists: {0}")]
    UserExists(String),

    /// User not found.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Token encoding failed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// Login could not complete for an internal reason.
    #[error("Unknown error authenticating user. Please try again")]
    LoginFailed,

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}
