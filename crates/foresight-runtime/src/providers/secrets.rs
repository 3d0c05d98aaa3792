//! Credential handling for model backends.
//!
//! Keys are wrapped in [`secrecy::SecretString`] as soon as they are read:
//!
//! - `Debug` and `Display` print `[REDACTED]`
//! - the value is zeroed on drop
//! - callers must call [`ApiCredential::expose`] at the point of use
//!
//! ## Usage
//!
//! ```ignore
//! let cred = ApiCredential::from_config_or_env(
//!     config.api.api_key.as_deref(),
//!     OPENROUTER_API_KEY_ENV,
//!     "OpenRouter API key",
//! )?;
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::BackendError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `api.api_key` in the config file
    Config,
    Environment,
    /// Passed in by the caller
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely stored API key.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read the key from `env_var`. Empty values count as unset.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, BackendError> {
        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(BackendError::NotConfigured(format!(
                "{} not set: configure '{}' environment variable",
                name, env_var
            ))),
        }
    }

    /// Use the configured key when present, else fall back to `env_var`.
    pub fn from_config_or_env(
        configured: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, BackendError> {
        if let Some(value) = configured.filter(|v| !v.trim().is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        Self::from_env(env_var, name).map_err(|_| {
            BackendError::NotConfigured(format!(
                "{} required: set 'api.api_key' in config or {} environment variable",
                name, env_var
            ))
        })
    }

    /// The raw key. Call only where the key is sent; never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-or-v1-super-secret";

    #[test]
    fn test_credential_redacted() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Config, "OpenRouter API key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(SECRET), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));

        let display = format!("{}", cred);
        assert!(!display.contains(SECRET), "Secret exposed in Display!");
        assert!(display.contains("OpenRouter API key from config"));
    }

    #[test]
    fn test_credential_expose() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Programmatic, "key");
        assert_eq!(cred.expose(), SECRET);
        assert_eq!(cred.source(), CredentialSource::Programmatic);
    }

    #[test]
    fn test_config_takes_precedence() {
        std::env::set_var("FORESIGHT_TEST_KEY_PRIORITY", "env-key");
        let cred = ApiCredential::from_config_or_env(
            Some("config-key"),
            "FORESIGHT_TEST_KEY_PRIORITY",
            "Test key",
        )
        .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);
        std::env::remove_var("FORESIGHT_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_blank_config_falls_back_to_env() {
        std::env::set_var("FORESIGHT_TEST_KEY_FALLBACK", "env-key");
        let cred =
            ApiCredential::from_config_or_env(Some("  "), "FORESIGHT_TEST_KEY_FALLBACK", "Test key")
                .unwrap();
        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);
        std::env::remove_var("FORESIGHT_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_missing_credential_error() {
        let err = ApiCredential::from_config_or_env(None, "FORESIGHT_NONEXISTENT_12345", "Test key")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Test key"));
        assert!(message.contains("FORESIGHT_NONEXISTENT_12345"));
        assert!(!err.is_transient());
    }
}
