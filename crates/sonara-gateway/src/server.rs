//! Gateway server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::GatewayError;
use crate::auth::{
    AuthConfig, AuthError, AuthState, CurrentUser, PublicUser, authenticate, create_admin, login,
    setup_status,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_address: String,
    /// Enable CORS.
    pub cors: bool,
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,
    /// Authentication configuration.
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 4533,
            bind_address: "127.0.0.1".to_string(),
            cors: true,
            data_dir: default_data_dir(),
            auth: AuthConfig::default(),
        }
    }
}

/// Default data directory (`<platform data dir>/sonara`).
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonara")
}

/// Gateway server.
pub struct Gateway {
    config: GatewayConfig,
    auth: Arc<AuthState>,
}

impl Gateway {
    /// Create a new gateway, opening the store in the data directory.
    ///
    /// # Errors
    ///
    /// Returns error if the data directory or the store cannot be opened.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| GatewayError::Config(format!("Failed to create data dir: {e}")))?;

        let auth_config = config.auth.clone().with_env_overrides();
        let auth = AuthState::open(auth_config, &config.data_dir)
            .map_err(|e| GatewayError::Config(format!("Auth init failed: {e}")))?;

        Ok(Self::with_auth_state(config, Arc::new(auth)))
    }

    /// Create a gateway over an existing auth state.
    #[must_use]
    pub fn with_auth_state(config: GatewayConfig, auth: Arc<AuthState>) -> Self {
        Self { config, auth }
    }

    /// The shared auth state.
    #[must_use]
    pub fn auth(&self) -> &Arc<AuthState> {
        &self.auth
    }

    /// Build the HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        let app = router(self.auth.clone());
        if self.config.cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Run the gateway server.
    ///
    /// # Errors
    ///
    /// Returns error if binding or serving fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        if let Err(e) = self.auth.bootstrap.auto_setup_from_env(self.auth.users()).await {
            tracing::warn!("Auto-setup from env failed: {}", e);
        }

        match self.auth.is_first_time().await {
            Ok(true) => tracing::warn!(
                "No users found. Create the first admin with POST /auth/createAdmin"
            ),
            Ok(false) => {}
            Err(e) => tracing::error!("Could not count users: {}", e),
        }

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Gateway listening on http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Build the API router over an auth state.
///
/// `/auth/*` and `/health` are public; everything under `/api` passes
/// through [`authenticate`].
pub fn router(auth: Arc<AuthState>) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me_handler))
        .route("/api/keepalive", get(keepalive_handler))
        .route_layer(middleware::from_fn_with_state(auth.clone(), authenticate));

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login))
        .route("/auth/createAdmin", post(create_admin))
        .route("/auth/status", get(setup_status))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(auth)
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn me_handler(current: CurrentUser) -> Result<Json<PublicUser>, AuthError> {
    current
        .user
        .as_ref()
        .map(|user| Json(user.to_public()))
        .ok_or_else(|| AuthError::UserNotFound(current.username().to_string()))
}

async fn keepalive_handler(current: CurrentUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "response": "ok",
        "username": current.username(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 4533);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert!(config.data_dir.ends_with("sonara"));
    }

    #[test]
    fn test_gateway_new() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = GatewayConfig {
            data_dir: temp_dir.path().join("data"),
            ..GatewayConfig::default()
        };

        let gateway = Gateway::new(config).unwrap();
        assert!(temp_dir.path().join("data").exists());
        let _router = gateway.router();
    }
}
