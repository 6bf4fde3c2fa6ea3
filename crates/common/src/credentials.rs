//! Credential lookup for inbound request validation.
//!
//! The validator resolves an `_app_id` to a [`Credential`] through a
//! [`CredentialStore`]. Two implementations ship with the crate:
//! - [`SettingsCredentialStore`] - built from the `[clients.*]` settings tables
//! - [`StaticCredentialStore`] - an in-memory map filled by the host

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use error_stack::Report;
use serde::Serialize;

use crate::error::SignatureError;
use crate::settings::Settings;

/// Shared secret bytes. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// A registered API client.
#[derive(Debug, Clone)]
pub struct Credential {
    pub app_id: String,
    pub secret: Secret,
    /// Non-secret attributes copied into the authenticated identity.
    pub attributes: BTreeMap<String, String>,
}

impl Credential {
    /// # Errors
    ///
    /// Returns a configuration error if `app_id` or `secret` is empty.
    pub fn new(
        app_id: impl Into<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Result<Self, Report<SignatureError>> {
        let app_id = app_id.into();
        let secret = Secret::new(secret);

        if app_id.is_empty() {
            return Err(Report::new(SignatureError::Configuration {
                message: "app_id is not defined.".into(),
            }));
        }
        if secret.is_empty() {
            return Err(Report::new(SignatureError::Configuration {
                message: format!("app_secret is not defined for app_id '{app_id}'."),
            }));
        }

        Ok(Self {
            app_id,
            secret,
            attributes: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Drops the secret.
    #[must_use]
    pub fn into_identity(self) -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            app_id: self.app_id,
            attributes: self.attributes,
        }
    }
}

/// The caller a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    pub app_id: String,
    pub attributes: BTreeMap<String, String>,
}

impl AuthenticatedIdentity {
    #[must_use]
    pub fn auth_identifier(&self) -> &str {
        &self.app_id
    }

    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }
}

/// Resolves app ids to credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns `Ok(Some(_))` for a known app id, `Ok(None)` for an unknown
    /// one, or `Err` if the store could not be queried.
    ///
    /// # Errors
    ///
    /// Returns a credential store error when the backend is unavailable.
    fn lookup(&self, app_id: &str) -> Result<Option<Credential>, Report<SignatureError>>;
}

/// In-memory credential map.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
    credentials: HashMap<String, Credential>,
}

impl StaticCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the credential for its app id.
    pub fn insert(&mut self, credential: Credential) {
        self.credentials
            .insert(credential.app_id.clone(), credential);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl FromIterator<Credential> for StaticCredentialStore {
    fn from_iter<I: IntoIterator<Item = Credential>>(iter: I) -> Self {
        let mut store = Self::new();
        for credential in iter {
            store.insert(credential);
        }
        store
    }
}

impl CredentialStore for StaticCredentialStore {
    fn lookup(&self, app_id: &str) -> Result<Option<Credential>, Report<SignatureError>> {
        Ok(self.credentials.get(app_id).cloned())
    }
}

/// Credentials taken from the `[clients.*]` settings tables.
#[derive(Debug, Clone)]
pub struct SettingsCredentialStore {
    inner: StaticCredentialStore,
}

impl SettingsCredentialStore {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let inner = settings
            .clients
            .iter()
            .filter_map(|(name, client)| {
                let credential =
                    Credential::new(client.app_id.as_str(), client.app_secret.as_bytes()).ok()?;

                let mut credential = credential
                    .with_attribute("client", name.as_str())
                    .with_attribute("scheme", client.scheme.as_str());
                if let Some(host) = &client.host {
                    credential = credential.with_attribute("host", host.as_str());
                }
                if let Some(ip) = &client.ip {
                    credential = credential.with_attribute("ip", ip.as_str());
                }
                if let Some(port) = client.port {
                    credential = credential.with_attribute("port", port.to_string());
                }
                Some(credential)
            })
            .collect();

        Self { inner }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CredentialStore for SettingsCredentialStore {
    fn lookup(&self, app_id: &str) -> Result<Option<Credential>, Report<SignatureError>> {
        self.inner.lookup(app_id)
    }
}
