//! Login credential parsing.

use serde_json::{Map, Value};

use super::AuthError;

/// Username and password taken from a login or setup request body.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Username as sent by the client.
    pub username: String,
    /// Password as sent by the client.
    pub password: String,
}

impl Credentials {
    /// Parse a JSON object body.
    ///
    /// Missing or non-string `username`/`password` fields become empty strings.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if the body is not a JSON object.
    pub fn from_body(body: &[u8]) -> Result<Self, AuthError> {
        let data: Map<String, Value> = serde_json::from_slice(body).map_err(|e| {
            tracing::error!(error = %e, "Parsing request body");
            AuthError::MalformedPayload
        })?;

        Ok(Self {
            username: string_field(&data, "username"),
            password: string_field(&data, "password"),
        })
    }
}

fn string_field(data: &Map<String, Value>, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// Keeps passwords out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
