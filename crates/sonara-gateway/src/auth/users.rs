//! User model and storage.

use std::path::Path;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use uuid::Uuid;

use super::AuthError;

/// Key prefix for user records in the users tree.
const USER_PREFIX: &str = "user:";
/// Key prefix for the username -> id index.
const USERNAME_INDEX_PREFIX: &str = "idx:username:";

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login. Lookups are case-sensitive.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Optional email address.
    pub email: Option<String>,
    /// Argon2 password hash (stored in DB, not exposed in public API).
    pub password_hash: String,
    /// Whether the user has administrative rights.
    pub is_admin: bool,
    /// When the user last logged in.
    pub last_login_at: Option<DateTime<Utc>>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns error if password hashing fails.
    pub fn new(
        username: impl Into<String>,
        password: &str,
        is_admin: bool,
    ) -> Result<Self, AuthError> {
        let username = username.into();

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: username.clone(),
            username,
            email: None,
            password_hash: hash_password(password)?,
            is_admin,
            last_login_at: None,
            created_at: Utc::now(),
        })
    }

    /// Verify a password against this user's hash.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the password doesn't match, or a
    /// config error if the stored hash is unreadable.
    pub fn verify_password(&self, password: &str) -> Result<(), AuthError> {
        verify_password(password, &self.password_hash)
    }

    /// Create a safe version of user for API responses (no password hash).
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            is_admin: self.is_admin,
            last_login_at: self.last_login_at,
        }
    }
}

/// Public user representation (for API responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    /// Unique user ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: Option<String>,
    /// Admin flag.
    pub is_admin: bool,
    /// Last login time.
    pub last_login_at: Option<DateTime<Utc>>,
}

/// User persistence consumed by the auth core.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by exact username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;

    /// Persist a new user. Fails with `UserExists` if the username is taken.
    async fn create(&self, user: &User) -> Result<(), AuthError>;

    /// Count stored users.
    async fn count_all(&self) -> Result<usize, AuthError>;

    /// Stamp the user's last login with the current time and return it.
    async fn update_last_login_at(&self, id: &str) -> Result<DateTime<Utc>, AuthError>;
}

/// Key/value properties (the JWT secret lives here).
#[async_trait]
pub trait PropertyRepository: Send + Sync {
    /// Read a property.
    async fn get_property(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// Write a property, replacing any previous value.
    async fn put_property(&self, key: &str, value: &str) -> Result<(), AuthError>;
}

/// Check a username/password pair against the store.
///
/// Unknown users and wrong passwords both yield `Ok(None)`. On success the
/// last-login time is updated; a failure there is logged and ignored.
///
/// # Errors
///
/// Returns error only if the store lookup fails or the stored hash is unreadable.
pub async fn validate_login(
    users: &dyn UserRepository,
    username: &str,
    password: &str,
) -> Result<Option<User>, AuthError> {
    let Some(mut user) = users.find_by_username(username).await? else {
        return Ok(None);
    };

    match user.verify_password(password) {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => return Ok(None),
        Err(e) => return Err(e),
    }

    match users.update_last_login_at(&user.id).await {
        Ok(at) => user.last_login_at = Some(at),
        Err(e) => tracing::error!(username = %username, error = %e, "Could not update last login"),
    }

    Ok(Some(user))
}

/// User and property store backed by sled.
pub struct SledStore {
    users: sled::Tree,
    properties: sled::Tree,
}

impl SledStore {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, AuthError> {
        let db = sled::open(path.join("auth"))
            .map_err(|e| AuthError::Storage(format!("Failed to open auth database: {e}")))?;

        Self::with_db(db)
    }

    /// Create a store with an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if the trees cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, AuthError> {
        let users = db
            .open_tree("users")
            .map_err(|e| AuthError::Storage(format!("Failed to open users tree: {e}")))?;
        let properties = db
            .open_tree("properties")
            .map_err(|e| AuthError::Storage(format!("Failed to open properties tree: {e}")))?;

        Ok(Self {
            users,
            properties,
        })
    }

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn get(&self, id: &str) -> Result<Option<User>, AuthError> {
        match self.users.get(user_key(id)) {
            Ok(Some(value)) => {
                let user: User = serde_json::from_slice(&value)
                    .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))?;
                Ok(Some(user))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Get error: {e}"))),
        }
    }

    fn write(&self, user: &User) -> Result<(), AuthError> {
        let value = serde_json::to_vec(user)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;

        self.users
            .insert(user_key(&user.id), value)
            .map_err(|e| AuthError::Storage(format!("Insert error: {e}")))?;

        self.users
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl UserRepository for SledStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        match self.users.get(username_key(username)) {
            Ok(Some(id_bytes)) => {
                let id = String::from_utf8_lossy(&id_bytes);
                self.get(&id)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Index lookup error: {e}"))),
        }
    }

    async fn create(&self, user: &User) -> Result<(), AuthError> {
        let index_key = username_key(&user.username);
        let record_key = user_key(&user.id);
        let value = serde_json::to_vec(user)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;

        // Index entry and record are committed together or not at all
        let result = self.users.transaction(|tx| {
            if tx.get(index_key.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(()));
            }
            tx.insert(index_key.as_bytes(), user.id.as_bytes())?;
            tx.insert(record_key.as_bytes(), value.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(AuthError::UserExists(user.username.clone()));
            }
            Err(TransactionError::Storage(e)) => {
                return Err(AuthError::Storage(format!("Insert error: {e}")));
            }
        }

        self.users
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        Ok(())
    }

    async fn count_all(&self) -> Result<usize, AuthError> {
        let mut count = 0;
        for entry in self.users.scan_prefix(USER_PREFIX) {
            entry.map_err(|e| AuthError::Storage(format!("Iter error: {e}")))?;
            count += 1;
        }
        Ok(count)
    }

    async fn update_last_login_at(&self, id: &str) -> Result<DateTime<Utc>, AuthError> {
        let mut user = self
            .get(id)?
            .ok_or_else(|| AuthError::UserNotFound(id.to_string()))?;

        let now = Utc::now();
        user.last_login_at = Some(now);
        self.write(&user)?;

        Ok(now)
    }
}

#[async_trait]
impl PropertyRepository for SledStore {
    async fn get_property(&self, key: &str) -> Result<Option<String>, AuthError> {
        let value = self
            .properties
            .get(key)
            .map_err(|e| AuthError::Storage(format!("Property read error: {e}")))?;

        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn put_property(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.properties
            .insert(key, value.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Property write error: {e}")))?;

        self.properties
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("users", &self.users.len())
            .finish_non_exhaustive()
    }
}

fn user_key(id: &str) -> String {
    format!("{USER_PREFIX}{id}")
}

fn username_key(username: &str) -> String {
    format!("{USERNAME_INDEX_PREFIX}{username}")
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Config(format!("Password hashing failed: {e}")))
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AuthError::Config(format!("Invalid hash: {e}")))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}
