//! First-run setup and bootstrap management.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::AuthError;
use super::users::{User, UserRepository};

/// Setup status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatus {
    /// True while no user exists and the first admin may be created.
    pub first_time: bool,
    /// Number of users configured.
    pub user_count: usize,
}

/// Guards creation of the first admin account.
///
/// Bootstrap state is never cached: every check counts the users in the
/// store. Admin creation runs the count and the insert under one lock, so
/// concurrent setup requests yield a single first admin.
#[derive(Debug, Default)]
pub struct BootstrapController {
    lock: Mutex<()>,
}

impl BootstrapController {
    /// Create a new bootstrap controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if no user exists yet.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot count users.
    pub async fn is_first_time(users: &dyn UserRepository) -> Result<bool, AuthError> {
        Ok(users.count_all().await? == 0)
    }

    /// Get setup status.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot count users.
    pub async fn status(users: &dyn UserRepository) -> Result<SetupStatus, AuthError> {
        let user_count = users.count_all().await?;
        Ok(SetupStatus {
            first_time: user_count == 0,
            user_count,
        })
    }

    /// Create the initial admin user.
    ///
    /// # Errors
    ///
    /// Returns `AdminExists` if any user is already present, or a storage
    /// error if counting or persisting fails.
    pub async fn create_first_admin(
        &self,
        users: &dyn UserRepository,
        username: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let _guard = self.lock.lock().await;

        if users.count_all().await? > 0 {
            return Err(AuthError::AdminExists);
        }

        tracing::warn!(username = %username, "Creating initial user");

        let mut admin = User::new(username, password, true)?;
        admin.name = title_case(username);
        admin.last_login_at = Some(Utc::now());

        if let Err(e) = users.create(&admin).await {
            tracing::error!(username = %username, error = %e, "Could not create initial user");
            return Err(e);
        }

        Ok(admin)
    }

    /// Create the first admin from `SONARA_ADMIN_USERNAME` and
    /// `SONARA_ADMIN_PASSWORD` if both are set and no user exists.
    ///
    /// # Errors
    ///
    /// Returns error if user creation fails.
    pub async fn auto_setup_from_env(
        &self,
        users: &dyn UserRepository,
    ) -> Result<Option<User>, AuthError> {
        let username = match std::env::var("SONARA_ADMIN_USERNAME") {
            Ok(u) if !u.is_empty() => u,
            _ => return Ok(None),
        };

        let password = match std::env::var("SONARA_ADMIN_PASSWORD") {
            Ok(p) if !p.is_empty() => p,
            _ => return Ok(None),
        };

        match self.create_first_admin(users, &username, &password).await {
            Ok(admin) => {
                tracing::info!(
                    username = %admin.username,
                    "Admin user created from environment variables"
                );
                Ok(Some(admin))
            }
            Err(AuthError::AdminExists) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Upper-case the first letter of every word.
///
/// A word starts after any character that is not alphanumeric or `_`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;

    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::auth::users::SledStore;

    fn open_store() -> (TempDir, SledStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("admin"), "Admin");
        assert_eq!(title_case("john doe"), "John Doe");
        assert_eq!(title_case("john.doe"), "John.Doe");
        assert_eq!(title_case("john_doe"), "John_doe");
        assert_eq!(title_case("élise"), "Élise");
        assert_eq!(title_case(""), "");
    }

    #[tokio::test]
    async fn test_first_time_follows_store() {
        let (_dir, store) = open_store();
        assert!(BootstrapController::is_first_time(&store).await.unwrap());

        store
            .create(&User::new("someone", "pw", false).unwrap())
            .await
            .unwrap();
        assert!(!BootstrapController::is_first_time(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_first_admin() {
        let (_dir, store) = open_store();
        let controller = BootstrapController::new();

        let admin = controller
            .create_first_admin(&store, "admin", "secret123")
            .await
            .unwrap();

        assert_eq!(admin.username, "admin");
        assert_eq!(admin.name, "Admin");
        assert!(admin.is_admin);
        assert!(admin.email.is_none());
        assert!(admin.last_login_at.is_some());
        assert!(admin.verify_password("secret123").is_ok());

        let status = BootstrapController::status(&store).await.unwrap();
        assert!(!status.first_time);
        assert_eq!(status.user_count, 1);
    }

    #[tokio::test]
    async fn test_second_admin_rejected() {
        let (_dir, store) = open_store();
        let controller = BootstrapController::new();

        controller
            .create_first_admin(&store, "admin", "secret")
            .await
            .unwrap();
        let result = controller
            .create_first_admin(&store, "other", "secret")
            .await;

        assert!(matches!(result, Err(AuthError::AdminExists)));
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_setup_creates_one_admin() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SledStore::open(temp_dir.path()).unwrap());
        let controller = Arc::new(BootstrapController::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller
                    .create_first_admin(store.as_ref(), &format!("admin{i}"), "pw")
                    .await
                    .is_ok()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.count_all().await.unwrap(), 1);
    }
}
