use std::collections::HashMap;
use std::fmt;

use log::debug;
use thiserror::Error;

use crate::config::CredentialConfig;

pub type CredentialResult<T> = Result<T, CredentialError>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unable to retrieve secret '{key}' from scope '{scope}': {message}")]
    Unavailable {
        scope: String,
        key: String,
        message: String,
    },
    #[error("secret '{key}' in scope '{scope}' is empty or not set")]
    Empty { scope: String, key: String },
}

impl CredentialError {
    pub fn unavailable(
        scope: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CredentialError::Unavailable {
            scope: scope.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}

/// A source of named secrets grouped by scope.
///
/// Implementations report a missing secret as [`CredentialError::Unavailable`].
/// Blank secrets are rejected by [`resolve_credential`], so implementations may return them.
pub trait CredentialResolver: Send + Sync {
    fn get(&self, scope: &str, key: &str) -> CredentialResult<String>;
}

/// The endpoint and secret used to open connections to the remote service.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredential {
    endpoint_url: String,
    secret_key: String,
}

impl ConnectionCredential {
    pub fn new(endpoint_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("endpoint_url", &self.endpoint_url)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn get_secret_or_fail(
    resolver: &dyn CredentialResolver,
    scope: &str,
    key: &str,
) -> CredentialResult<String> {
    let value = resolver.get(scope, key)?;
    if value.trim().is_empty() {
        return Err(CredentialError::Empty {
            scope: scope.to_string(),
            key: key.to_string(),
        });
    }
    Ok(value)
}

/// Resolves the endpoint URL and then the access token.
/// The resolver is called exactly once for each of them.
pub fn resolve_credential(
    resolver: &dyn CredentialResolver,
    config: &CredentialConfig,
) -> CredentialResult<ConnectionCredential> {
    let endpoint_url = get_secret_or_fail(resolver, &config.scope, &config.endpoint_key)?;
    let secret_key = get_secret_or_fail(resolver, &config.scope, &config.token_key)?;
    debug!(
        "resolved connection credential from scope '{}' for endpoint {endpoint_url}",
        config.scope
    );
    Ok(ConnectionCredential::new(endpoint_url, secret_key))
}

/// Resolves secrets from environment variables named
/// `FANOUT_SECRET__<SCOPE>__<KEY>`.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    pub const PREFIX: &'static str = "FANOUT_SECRET";

    pub fn variable_name(scope: &str, key: &str) -> String {
        fn sanitize(s: &str) -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        }
        format!("{}__{}__{}", Self::PREFIX, sanitize(scope), sanitize(key))
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn get(&self, scope: &str, key: &str) -> CredentialResult<String> {
        let name = Self::variable_name(scope, key);
        std::env::var(&name)
            .map_err(|e| CredentialError::unavailable(scope, key, format!("{name}: {e}")))
    }
}

/// Resolves secrets from an in-memory map.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialResolver {
    secrets: HashMap<(String, String), String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(
        mut self,
        scope: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets.insert((scope.into(), key.into()), value.into());
        self
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn get(&self, scope: &str, key: &str) -> CredentialResult<String> {
        self.secrets
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| CredentialError::unavailable(scope, key, "secret does not exist"))
    }
}
