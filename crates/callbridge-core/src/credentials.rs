//! Logon credentials
//!
//! An identity logs on with either a long-lived login key or a password,
//! optionally accompanied by a one-time second-factor code. The union is
//! enforced when the details are built, so an invalid combination is a
//! configuration error raised before any network activity.

use std::fmt;

use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Deserializer};

use crate::errors::{HarnessError, HarnessResult};

/// Secret half of the logon details
#[derive(Clone, PartialEq, Eq)]
pub enum LogonSecret {
    LoginKey(String),
    Password {
        password: String,
        auth_code: Option<String>,
    },
}

impl fmt::Debug for LogonSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogonSecret::LoginKey(_) => f.write_str("LoginKey(<redacted>)"),
            LogonSecret::Password { auth_code, .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .field("auth_code", &auth_code.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Credentials bound to one logical identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonDetails {
    username: String,
    secret: LogonSecret,
}

/// Raw, unvalidated credential inputs
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CredentialSource {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub auth_code: Option<String>,
}

// Environment values that look numeric arrive as numbers
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.map(|value| match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }))
}

impl LogonDetails {
    pub fn with_login_key(username: impl Into<String>, key: impl Into<String>) -> HarnessResult<Self> {
        Self::from_source(
            "inline",
            CredentialSource {
                user: Some(username.into()),
                key: Some(key.into()),
                ..Default::default()
            },
        )
    }

    pub fn with_password(
        username: impl Into<String>,
        password: impl Into<String>,
        auth_code: Option<String>,
    ) -> HarnessResult<Self> {
        Self::from_source(
            "inline",
            CredentialSource {
                user: Some(username.into()),
                password: Some(password.into()),
                auth_code,
                ..Default::default()
            },
        )
    }

    /// Read `{PREFIX}_STEAM_USER`, `_KEY`, `_PASSWORD` and `_AUTH_CODE`
    pub fn from_env(prefix: &str) -> HarnessResult<Self> {
        let env_prefix = format!("{}_STEAM_", prefix);
        let source: CredentialSource = Figment::new()
            .merge(Env::prefixed(&env_prefix))
            .extract()
            .map_err(|e| {
                HarnessError::configuration(format!("Failed to read {}* variables: {}", env_prefix, e))
            })?;

        Self::from_source(prefix, source)
    }

    /// Validate a raw source; `origin` names it in error messages
    pub fn from_source(origin: &str, source: CredentialSource) -> HarnessResult<Self> {
        let username = non_empty(source.user).ok_or_else(|| {
            HarnessError::configuration(format!("The {}_STEAM_USER value must be specified", origin))
        })?;

        let secret = match (non_empty(source.key), non_empty(source.password)) {
            (Some(key), None) => {
                if non_empty(source.auth_code).is_some() {
                    return Err(HarnessError::configuration(format!(
                        "{}: a second-factor code can only accompany a password",
                        origin
                    )));
                }
                LogonSecret::LoginKey(key)
            }
            (None, Some(password)) => LogonSecret::Password {
                password,
                auth_code: non_empty(source.auth_code),
            },
            (Some(_), Some(_)) => {
                return Err(HarnessError::configuration(format!(
                    "Only one of {0}_STEAM_KEY or {0}_STEAM_PASSWORD may be specified",
                    origin
                )))
            }
            (None, None) => {
                return Err(HarnessError::configuration(format!(
                    "Either the {0}_STEAM_KEY or {0}_STEAM_PASSWORD value must be specified",
                    origin
                )))
            }
        };

        Ok(Self { username, secret })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &LogonSecret {
        &self.secret
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
