//! JWT token management.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::AuthError;
use super::config::AuthConfig;
use super::users::PropertyRepository;

/// Property key under which a generated secret is persisted.
pub(crate) const JWT_SECRET_PROPERTY: &str = "JWTSecret";

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Random token ID, makes every signed token unique.
    pub jti: String,
}

/// JWT manager for creating and validating tokens.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expiry: Duration,
}

impl JwtManager {
    /// Create a new JWT manager with a secret key.
    ///
    /// The secret should be at least 32 bytes for security.
    #[must_use]
    pub fn new(secret: &[u8], issuer: impl Into<String>, expiry: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            expiry,
        }
    }

    /// Create a JWT manager from a hex-encoded secret.
    ///
    /// # Errors
    ///
    /// Returns error if hex decoding fails.
    pub fn from_hex_secret(
        hex_secret: &str,
        issuer: impl Into<String>,
        expiry: Duration,
    ) -> Result<Self, AuthError> {
        let secret = hex::decode(hex_secret)
            .map_err(|e| AuthError::Config(format!("Invalid hex secret: {e}")))?;
        Ok(Self::new(&secret, issuer, expiry))
    }

    /// Generate a random 256-bit secret key.
    #[must_use]
    pub fn generate_secret() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    /// Generate a random secret as hex string.
    #[must_use]
    pub fn generate_hex_secret() -> String {
        hex::encode(Self::generate_secret())
    }

    /// Create a token for a username.
    ///
    /// # Errors
    ///
    /// Returns error if the expiry is out of range or token encoding fails.
    pub fn create_token(&self, username: &str) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let exp = chrono::Duration::from_std(self.expiry)
            .ok()
            .and_then(|expiry| now.checked_add_signed(expiry))
            .ok_or_else(|| {
                AuthError::Signing(format!("Token expiry out of range: {:?}", self.expiry))
            })?;

        let claims = Claims {
            sub: username.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: token_id(),
        };

        let token = self.sign(&claims)?;
        Ok((token, exp))
    }

    /// Re-sign already validated claims with a fresh issue time and expiry.
    ///
    /// # Errors
    ///
    /// Returns error if token encoding fails.
    pub fn touch_token(&self, claims: &Claims) -> Result<String, AuthError> {
        let (token, _) = self.create_token(&claims.sub)?;
        Ok(token)
    }

    /// Validate a token and issue its refreshed successor.
    ///
    /// # Errors
    ///
    /// Returns error if the token is invalid or re-signing fails.
    pub fn refresh_token(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.validate_token(token)?;
        self.touch_token(&claims)
    }

    /// Validate and decode a token.
    ///
    /// # Errors
    ///
    /// Returns error if the signature, expiry or issuer check fails, or the
    /// subject is missing or empty.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::TokenInvalid(format!("Validation failed: {e}")))?
            .claims;

        if claims.sub.is_empty() {
            return Err(AuthError::TokenInvalid("Empty subject".to_string()));
        }

        Ok(claims)
    }

    /// Extract token from Authorization header.
    ///
    /// Expects format: "Bearer <token>"
    #[must_use]
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(format!("Encoding failed: {e}")))
    }
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.issuer)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

fn token_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Lazily built `JwtManager`, initialized at most once.
///
/// The signing secret comes from the config when set; otherwise it is read
/// from the property store, generating and persisting one on first use.
/// Concurrent first callers all wait on the same initialization.
pub struct TokenIssuer {
    secret: Option<String>,
    issuer: String,
    expiry: Duration,
    manager: OnceCell<JwtManager>,
}

impl TokenIssuer {
    /// Create an uninitialized issuer from auth config.
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.issuer.clone(),
            expiry: config.session_timeout(),
            manager: OnceCell::new(),
        }
    }

    /// Get the manager, initializing it on first call.
    ///
    /// # Errors
    ///
    /// Returns error if the secret cannot be loaded, stored or decoded. A
    /// failed initialization is retried on the next call.
    pub async fn get(&self, properties: &dyn PropertyRepository) -> Result<&JwtManager, AuthError> {
        self.manager
            .get_or_try_init(|| self.init(properties))
            .await
    }

    /// Whether the signing key has been set up.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.manager.initialized()
    }

    async fn init(&self, properties: &dyn PropertyRepository) -> Result<JwtManager, AuthError> {
        let secret = match &self.secret {
            Some(secret) => secret.clone(),
            None => match properties.get_property(JWT_SECRET_PROPERTY).await? {
                Some(secret) => secret,
                None => {
                    let secret = JwtManager::generate_hex_secret();
                    properties.put_property(JWT_SECRET_PROPERTY, &secret).await?;
                    tracing::info!("Generated new JWT secret");
                    secret
                }
            },
        };

        tracing::debug!(issuer = %self.issuer, "Token auth initialized");
        JwtManager::from_hex_secret(&secret, self.issuer.clone(), self.expiry)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    fn create_manager() -> JwtManager {
        let secret = JwtManager::generate_secret();
        JwtManager::new(&secret, "sonara", Duration::from_secs(1800))
    }

    #[derive(Default)]
    struct CountingProperties {
        value: Mutex<Option<String>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl PropertyRepository for CountingProperties {
        async fn get_property(&self, _key: &str) -> Result<Option<String>, AuthError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.value.lock().await.clone())
        }

        async fn put_property(&self, _key: &str, value: &str) -> Result<(), AuthError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.value.lock().await = Some(value.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_generate_secret() {
        let secret1 = JwtManager::generate_secret();
        let secret2 = JwtManager::generate_secret();
        assert_ne!(secret1, secret2);
        assert_eq!(secret1.len(), 32);
    }

    #[test]
    fn test_create_and_validate_token() {
        let manager = create_manager();
        let (token, expires) = manager.create_token("alice").unwrap();

        assert!(expires > Utc::now());

        let claims = manager.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, "sonara");
        assert_eq!(claims.exp, expires.timestamp());
    }

    #[test]
    fn test_tokens_are_unique() {
        let manager = create_manager();
        let (first, _) = manager.create_token("alice").unwrap();
        let (second, _) = manager.create_token("alice").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_refresh_keeps_subject() {
        let manager = create_manager();
        let (token, _) = manager.create_token("alice").unwrap();

        let refreshed = manager.refresh_token(&token).unwrap();
        assert_ne!(refreshed, token);

        let claims = manager.validate_token(&refreshed).unwrap();
        assert_eq!(claims.sub, "alice");

        // The old token stays valid until its own expiry
        assert!(manager.validate_token(&token).is_ok());
    }

    #[test]
    fn test_refresh_rejects_invalid_token() {
        let manager = create_manager();
        assert!(matches!(
            manager.refresh_token("invalid.token.here"),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_invalid_token() {
        let manager = create_manager();
        assert!(manager.validate_token("invalid.token.here").is_err());

        let other = create_manager();
        let (token, _) = other.create_token("alice").unwrap();
        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let manager = create_manager();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            iss: "sonara".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            jti: token_id(),
        };
        let token = manager.sign(&claims).unwrap();

        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_out_of_range_expiry_fails_without_panic() {
        let config = AuthConfig {
            session_timeout_minutes: 10_000_000_000_000,
            ..AuthConfig::default()
        };
        let manager = JwtManager::new(
            &JwtManager::generate_secret(),
            "sonara",
            config.session_timeout(),
        );

        assert!(matches!(
            manager.create_token("alice"),
            Err(AuthError::Signing(_))
        ));

        let saturated = AuthConfig {
            session_timeout_minutes: u64::MAX,
            ..AuthConfig::default()
        };
        let manager = JwtManager::new(
            &JwtManager::generate_secret(),
            "sonara",
            saturated.session_timeout(),
        );
        let claims = Claims {
            sub: "alice".to_string(),
            iss: "sonara".to_string(),
            iat: 0,
            exp: 0,
            jti: token_id(),
        };
        assert!(matches!(
            manager.touch_token(&claims),
            Err(AuthError::Signing(_))
        ));
    }

    #[test]
    fn test_wrong_issuer() {
        let secret = JwtManager::generate_secret();
        let ours = JwtManager::new(&secret, "sonara", Duration::from_secs(60));
        let theirs = JwtManager::new(&secret, "elsewhere", Duration::from_secs(60));

        let (token, _) = theirs.create_token("alice").unwrap();
        assert!(ours.validate_token(&token).is_err());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let manager = create_manager();
        let (token, _) = manager.create_token("").unwrap();
        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_non_string_subject_rejected() {
        let secret = JwtManager::generate_secret();
        let manager = JwtManager::new(&secret, "sonara", Duration::from_secs(60));
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": 42,
            "iss": "sonara",
            "iat": now,
            "exp": now + 60,
            "jti": "x",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&secret),
        )
        .unwrap();

        assert!(matches!(
            manager.validate_token(&token),
            Err(AuthError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(
            JwtManager::extract_from_header("Bearer abc123"),
            Some("abc123")
        );
        assert_eq!(
            JwtManager::extract_from_header("bearer abc123"),
            Some("abc123")
        );
        assert_eq!(JwtManager::extract_from_header("Bearer "), None);
        assert_eq!(JwtManager::extract_from_header("abc123"), None);
    }

    #[tokio::test]
    async fn test_issuer_uses_configured_secret() {
        let secret = JwtManager::generate_hex_secret();
        let config = AuthConfig::builder().jwt_secret(secret.clone()).build();
        let issuer = TokenIssuer::new(&config);
        let properties = CountingProperties::default();

        let manager = issuer.get(&properties).await.unwrap();
        let (token, _) = manager.create_token("alice").unwrap();

        let expected = JwtManager::from_hex_secret(&secret, "sonara", config.session_timeout())
            .unwrap();
        assert_eq!(expected.validate_token(&token).unwrap().sub, "alice");
        assert_eq!(properties.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_issuer_reuses_stored_secret() {
        let properties = CountingProperties::default();
        let config = AuthConfig::default();

        let first = TokenIssuer::new(&config);
        let (token, _) = first.get(&properties).await.unwrap().create_token("bob").unwrap();

        // A second process start reads the persisted secret back
        let second = TokenIssuer::new(&config);
        let claims = second
            .get(&properties)
            .await
            .unwrap()
            .validate_token(&token)
            .unwrap();
        assert_eq!(claims.sub, "bob");
        assert_eq!(properties.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_issuer_initializes_once() {
        let properties = Arc::new(CountingProperties::default());
        let issuer = Arc::new(TokenIssuer::new(&AuthConfig::default()));
        assert!(!issuer.is_initialized());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let issuer = issuer.clone();
            let properties = properties.clone();
            handles.push(tokio::spawn(async move {
                let manager = issuer.get(properties.as_ref()).await.unwrap();
                std::ptr::from_ref(manager) as usize
            }));
        }

        let mut addresses = Vec::new();
        for handle in handles {
            addresses.push(handle.await.unwrap());
        }
        addresses.dedup();

        assert_eq!(addresses.len(), 1);
        assert!(issuer.is_initialized());
        assert_eq!(properties.reads.load(Ordering::SeqCst), 1);
        assert_eq!(properties.writes.load(Ordering::SeqCst), 1);
    }
}
