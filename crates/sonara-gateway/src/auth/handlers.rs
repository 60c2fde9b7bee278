//! Login and first-admin HTTP handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION},
    },
};
use serde::Serialize;

use super::AuthError;
use super::credentials::Credentials;
use super::middleware::AuthState;
use super::setup::{BootstrapController, SetupStatus};
use super::users::validate_login;

/// Headers whose values never reach the audit log.
const SENSITIVE_HEADERS: [HeaderName; 3] = [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION];

/// Successful login body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Human readable confirmation.
    pub message: String,
    /// Bearer token for subsequent requests.
    pub token: String,
    /// Display name.
    pub name: String,
    /// Username.
    pub username: String,
    /// Admin flag.
    pub is_admin: bool,
    /// Server version.
    pub version: String,
}

/// `POST /auth/login`
///
/// # Errors
///
/// `MalformedPayload` (422), `BootstrapRequired` or `InvalidCredentials`
/// (401), `LoginFailed` (500).
pub async fn login(
    State(auth): State<Arc<AuthState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LoginResponse>, AuthError> {
    let credentials = Credentials::from_body(&body)?;
    handle_login(&auth, &credentials, &headers).await
}

/// `POST /auth/createAdmin`
///
/// Only succeeds while no user exists; the new admin is logged in straight
/// away and the response matches [`login`].
///
/// # Errors
///
/// `MalformedPayload` (422), `AdminExists` (403), `Storage` (500), plus the
/// errors of [`login`].
pub async fn create_admin(
    State(auth): State<Arc<AuthState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LoginResponse>, AuthError> {
    let credentials = Credentials::from_body(&body)?;

    auth.bootstrap
        .create_first_admin(auth.users(), &credentials.username, &credentials.password)
        .await?;

    handle_login(&auth, &credentials, &headers).await
}

/// `GET /auth/status`
///
/// # Errors
///
/// `Storage` (500) if users cannot be counted.
pub async fn setup_status(
    State(auth): State<Arc<AuthState>>,
) -> Result<Json<SetupStatus>, AuthError> {
    let status = BootstrapController::status(auth.users()).await?;
    Ok(Json(status))
}

async fn handle_login(
    auth: &AuthState,
    credentials: &Credentials,
    headers: &HeaderMap,
) -> Result<Json<LoginResponse>, AuthError> {
    let username = credentials.username.as_str();

    let user = validate_login(auth.users(), username, &credentials.password)
        .await
        .map_err(|e| {
            tracing::error!(username = %username, error = %e, "Could not validate login");
            AuthError::LoginFailed
        })?;

    let Some(user) = user else {
        if matches!(auth.is_first_time().await, Ok(true)) {
            return Err(AuthError::BootstrapRequired);
        }
        tracing::warn!(
            username = %username,
            request = ?redact_headers(headers),
            "Unsuccessful login"
        );
        return Err(AuthError::InvalidCredentials);
    };

    let (token, _) = auth
        .tokens()
        .await
        .and_then(|tokens| tokens.create_token(&user.username))
        .map_err(|e| {
            tracing::error!(username = %username, error = %e, "Could not issue token");
            AuthError::LoginFailed
        })?;

    tracing::info!(username = %username, "User authenticated");

    Ok(Json(LoginResponse {
        message: format!("User '{username}' authenticated successfully"),
        token,
        name: user.name,
        username: user.username,
        is_admin: user.is_admin,
        version: auth.config.server_version.clone(),
    }))
}

/// Copy of `headers` with credential-bearing values masked.
fn redact_headers(headers: &HeaderMap) -> HeaderMap {
    let mut redacted = headers.clone();
    for name in &SENSITIVE_HEADERS {
        if let axum::http::header::Entry::Occupied(mut entry) = redacted.entry(name) {
            for value in entry.iter_mut() {
                *value = HeaderValue::from_static("[redacted]");
            }
        }
    }
    redacted
}
