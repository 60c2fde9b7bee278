//! Authentication middleware for axum.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::AuthError;
use super::config::AuthConfig;
use super::jwt::{Claims, JwtManager, TokenIssuer};
use super::setup::BootstrapController;
use super::users::{PropertyRepository, SledStore, User, UserRepository};

/// Query parameter accepted as a token carrier when no header is sent.
const TOKEN_QUERY_PARAM: &str = "jwt";

/// Shared authentication state.
pub struct AuthState {
    /// Auth configuration.
    pub config: AuthConfig,
    /// Bootstrap controller.
    pub bootstrap: BootstrapController,
    users: Arc<dyn UserRepository>,
    properties: Arc<dyn PropertyRepository>,
    tokens: TokenIssuer,
}

impl AuthState {
    /// Create a new auth state over a store.
    #[must_use]
    pub fn new<S>(config: AuthConfig, store: Arc<S>) -> Self
    where
        S: UserRepository + PropertyRepository + 'static,
    {
        let users: Arc<dyn UserRepository> = store.clone();
        let properties: Arc<dyn PropertyRepository> = store;

        Self {
            tokens: TokenIssuer::new(&config),
            config,
            bootstrap: BootstrapController::new(),
            users,
            properties,
        }
    }

    /// Open the sled store in `data_dir` and build the auth state on it.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened.
    pub fn open(config: AuthConfig, data_dir: &std::path::Path) -> Result<Self, AuthError> {
        let store = Arc::new(SledStore::open(data_dir)?);
        Ok(Self::new(config, store))
    }

    /// The user store.
    #[must_use]
    pub fn users(&self) -> &dyn UserRepository {
        self.users.as_ref()
    }

    /// The token manager, initialized on first use.
    ///
    /// # Errors
    ///
    /// Returns error if the signing key cannot be set up.
    pub async fn tokens(&self) -> Result<&JwtManager, AuthError> {
        self.tokens.get(self.properties.as_ref()).await
    }

    /// Check if no user exists yet.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot count users.
    pub async fn is_first_time(&self) -> Result<bool, AuthError> {
        BootstrapController::is_first_time(self.users()).await
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

/// The authenticated caller of the current request.
///
/// Inserted into request extensions by [`authenticate`]; use it as a handler
/// parameter on routes behind that middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Verified token claims.
    pub claims: Claims,
    /// The user named by the token, if the lookup succeeded.
    pub user: Option<User>,
}

impl CurrentUser {
    /// Get the username from the token subject.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.claims.sub
    }

    /// Check if the resolved user is an admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AuthError::TokenInvalid("Request was not authenticated".to_string()))
    }
}

/// Error response for auth failures.
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::MalformedPayload => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_payload"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::BootstrapRequired => (StatusCode::UNAUTHORIZED, "no_users"),
            AuthError::TokenInvalid(_) | AuthError::RefreshFailed(_) => {
                (StatusCode::UNAUTHORIZED, "not_authenticated")
            }
            AuthError::AdminExists => (StatusCode::FORBIDDEN, "admin_exists"),
            AuthError::UserExists(_) => (StatusCode::CONFLICT, "user_exists"),
            AuthError::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
            AuthError::LoginFailed
            | AuthError::Signing(_)
            | AuthError::Storage(_)
            | AuthError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        // Token details and signing failures stay in the logs
        let error = match &self {
            AuthError::TokenInvalid(_) | AuthError::RefreshFailed(_) => {
                "Not authenticated".to_string()
            }
            AuthError::Signing(_) => AuthError::LoginFailed.to_string(),
            other => other.to_string(),
        };

        (status, Json(AuthErrorResponse { error, code })).into_response()
    }
}

/// Gate a request behind a valid token.
///
/// On success the token is re-signed with a fresh expiry and returned in the
/// response `Authorization` header, and a [`CurrentUser`] is attached to the
/// request. Use with `axum::middleware::from_fn_with_state`.
///
/// # Errors
///
/// Rejects with `BootstrapRequired` when no users exist, `TokenInvalid` for
/// a missing or bad token, and `RefreshFailed` if re-signing fails.
pub async fn authenticate(
    State(auth): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = token_from_request(&request).map(str::to_owned);
    let claims = match verify_token(&auth, token.as_deref()).await {
        Ok(claims) => claims,
        Err(e) => {
            if matches!(auth.is_first_time().await, Ok(true)) {
                return Err(AuthError::BootstrapRequired);
            }
            tracing::debug!(uri = %request.uri(), error = %e, "Rejecting unauthenticated request");
            return Err(e);
        }
    };

    let user = match auth.users().find_by_username(&claims.sub).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(username = %claims.sub, error = %e, "Could not load authenticated user");
            None
        }
    };

    let refreshed = auth
        .tokens()
        .await
        .and_then(|tokens| tokens.touch_token(&claims))
        .map_err(|e| {
            tracing::error!(username = %claims.sub, error = %e, "Signing new token");
            AuthError::RefreshFailed(e.to_string())
        })?;
    let header = HeaderValue::from_str(&format!("Bearer {refreshed}"))
        .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

    request.extensions_mut().insert(CurrentUser { claims, user });

    let mut response = next.run(request).await;
    response.headers_mut().insert(AUTHORIZATION, header);
    Ok(response)
}

async fn verify_token(auth: &AuthState, token: Option<&str>) -> Result<Claims, AuthError> {
    let token = token.ok_or_else(|| AuthError::TokenInvalid("Missing bearer token".to_string()))?;

    let tokens = auth
        .tokens()
        .await
        .map_err(|e| AuthError::TokenInvalid(format!("Token auth unavailable: {e}")))?;

    tokens.validate_token(token)
}

/// Find the token in the `Authorization` header, then the `jwt` query parameter.
fn token_from_request(request: &Request) -> Option<&str> {
    if let Some(header) = request.headers().get(AUTHORIZATION) {
        return header.to_str().ok().and_then(JwtManager::extract_from_header);
    }

    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix(TOKEN_QUERY_PARAM)
                .and_then(|rest| rest.strip_prefix('='))
                .filter(|t| !t.is_empty())
        })
    })
}
