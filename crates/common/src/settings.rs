use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

use crate::constants::{
    DEFAULT_FRESHNESS_WINDOW, DEFAULT_IDENTITY, DEFAULT_NONCE_CACHE_TIMEOUT,
};
use crate::error::SignatureError;

/// Prefix for environment overrides, e.g. `API_SIGNATURE__IDENTITY`.
pub const ENVIRONMENT_PREFIX: &str = "API_SIGNATURE";

fn default_identity() -> String {
    DEFAULT_IDENTITY.to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_true() -> bool {
    true
}

fn default_freshness_window_secs() -> u64 {
    DEFAULT_FRESHNESS_WINDOW.as_secs()
}

fn default_nonce_cache_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_NONCE_CACHE_TIMEOUT.as_millis()).unwrap_or(500)
}

/// How POST/PUT/DELETE payloads are placed in the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Form,
    Json,
}

/// TLS verification setting for https clients.
///
/// Accepts `true` (verify against system roots), `false` (verification
/// disabled) or a path to a PEM bundle to pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertPem {
    Enabled(bool),
    Path(PathBuf),
}

impl Default for CertPem {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

impl<'de> Deserialize<'de> for CertPem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        // Environment overrides always arrive as strings.
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => Self::Enabled(flag),
            Raw::Text(text) => match text.trim() {
                "" | "true" => Self::Enabled(true),
                "false" => Self::Enabled(false),
                path => Self::Path(PathBuf::from(path)),
            },
        })
    }
}

impl Serialize for CertPem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Enabled(flag) => serializer.serialize_bool(*flag),
            Self::Path(path) => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SignatureSettings {
    /// Maximum request age in seconds. Client and server must agree.
    #[serde(default = "default_freshness_window_secs")]
    #[validate(range(min = 1))]
    pub freshness_window_secs: u64,

    /// Upper bound for a single nonce cache call.
    #[serde(default = "default_nonce_cache_timeout_ms")]
    #[validate(range(min = 1))]
    pub nonce_cache_timeout_ms: u64,
}

impl Default for SignatureSettings {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window_secs(),
            nonce_cache_timeout_ms: default_nonce_cache_timeout_ms(),
        }
    }
}

impl SignatureSettings {
    #[must_use]
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    #[must_use]
    pub fn nonce_cache_timeout(&self) -> Duration {
        Duration::from_millis(self.nonce_cache_timeout_ms)
    }
}

/// One configured API client.
///
/// Outgoing clients need `host`; entries used only for server-side
/// credential lookup may omit the connection fields.
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct ClientSettings {
    #[validate(length(min = 1))]
    pub app_id: String,

    #[validate(length(min = 1))]
    pub app_secret: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Connect to this address instead of resolving `host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub https_cert_pem: CertPem,

    #[serde(default = "default_true")]
    pub enable_log: bool,

    #[serde(default)]
    pub body_format: BodyFormat,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("https_cert_pem", &self.https_cert_pem)
            .field("enable_log", &self.enable_log)
            .field("body_format", &self.body_format)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Settings {
    /// Prefix of every nonce this process generates.
    #[serde(default = "default_identity")]
    #[validate(length(min = 1))]
    pub identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_client: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub signature: SignatureSettings,

    #[serde(default)]
    pub clients: BTreeMap<String, ClientSettings>,
}

impl Settings {
    /// Parses settings from TOML and applies `API_SIGNATURE__*` environment
    /// overrides, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TOML is malformed, a required field
    /// is missing, or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<SignatureError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_PREFIX)
            .separator("__");

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(SignatureError::Configuration {
                message: "Failed to build configuration".into(),
            })?;

        let settings: Self =
            config
                .try_deserialize()
                .change_context(SignatureError::Configuration {
                    message: "Failed to deserialize configuration".into(),
                })?;

        settings.validate_all()?;
        Ok(settings)
    }

    /// Reads and parses a settings file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, Report<SignatureError>> {
        let content = fs::read_to_string(path).change_context(SignatureError::Configuration {
            message: format!("Failed to read settings file {}", path.display()),
        })?;
        Self::from_toml(&content)
    }

    /// Runs field validation on the settings and every client entry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending section.
    pub fn validate_all(&self) -> Result<(), Report<SignatureError>> {
        self.validate().map_err(|e| {
            Report::new(SignatureError::Configuration {
                message: format!("Settings validation failed: {e}"),
            })
        })?;

        let mut app_ids = HashSet::new();
        for (name, client) in &self.clients {
            client.validate().map_err(|e| {
                Report::new(SignatureError::Configuration {
                    message: format!("Client [{name}] validation failed: {e}"),
                })
            })?;
            if !app_ids.insert(client.app_id.as_str()) {
                return Err(Report::new(SignatureError::Configuration {
                    message: format!("Client [{name}] reuses app_id '{}'", client.app_id),
                }));
            }
        }

        if let Some(default) = &self.default_client {
            if !self.clients.contains_key(default) {
                return Err(Report::new(SignatureError::Configuration {
                    message: format!("Default client [{default}] is not defined."),
                }));
            }
        }

        Ok(())
    }

    /// Serializes the merged settings back to TOML with a stable key order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if serialization fails.
    pub fn to_canonical_toml(&self) -> Result<String, Report<SignatureError>> {
        toml::to_string(self).change_context(SignatureError::Configuration {
            message: "Failed to serialize settings".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::crate_test_settings_str;

    #[test]
    fn test_settings_from_valid_toml() {
        let settings =
            Settings::from_toml(&crate_test_settings_str()).expect("test settings should parse");

        assert_eq!(settings.identity, "test-service");
        assert_eq!(settings.default_client.as_deref(), Some("billing"));
        assert_eq!(settings.signature.freshness_window(), Duration::from_secs(10));

        let billing = &settings.clients["billing"];
        assert_eq!(billing.app_id, "abc");
        assert_eq!(billing.app_secret, "topsecret");
        assert_eq!(billing.host.as_deref(), Some("api.example.com"));
        assert_eq!(billing.https_cert_pem, CertPem::Enabled(true));
        assert!(billing.enable_log);
        assert_eq!(billing.body_format, BodyFormat::Form);

        let pinned = &settings.clients["pinned"];
        assert_eq!(pinned.scheme, "https");
        assert_eq!(pinned.ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(pinned.port, Some(8443));
        assert_eq!(
            pinned.https_cert_pem,
            CertPem::Path(PathBuf::from("/etc/ssl/api.pem"))
        );
        assert_eq!(pinned.body_format, BodyFormat::Json);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_toml(
            r#"
            [clients.only]
            app_id = "id"
            app_secret = "secret"
            "#,
        )
        .expect("minimal settings should parse");

        assert_eq!(settings.identity, "identity");
        assert_eq!(settings.default_client, None);
        assert_eq!(settings.signature.freshness_window_secs, 10);

        let client = &settings.clients["only"];
        assert_eq!(client.scheme, "http");
        assert_eq!(client.host, None);
        assert_eq!(client.port, None);
        assert_eq!(client.https_cert_pem, CertPem::Enabled(true));
    }

    #[test]
    fn test_settings_empty_toml_has_no_clients() {
        let settings = Settings::from_toml("").expect("empty settings should parse");
        assert!(settings.clients.is_empty());
    }

    #[test]
    fn test_settings_missing_secret() {
        let result = Settings::from_toml(
            r#"
            [clients.only]
            app_id = "id"
            "#,
        );
        assert!(result.is_err(), "Should fail when app_secret is missing");
    }

    #[test]
    fn test_settings_empty_secret_fails_validation() {
        let result = Settings::from_toml(
            r#"
            [clients.only]
            app_id = "id"
            app_secret = ""
            "#,
        );
        let err = result.expect_err("empty secret should fail validation");
        assert!(err.to_string().contains("Client [only] validation failed"));
    }

    #[test]
    fn test_settings_zero_window_fails_validation() {
        let result = Settings::from_toml(
            r#"
            [signature]
            freshness_window_secs = 0
            "#,
        );
        assert!(result.is_err(), "Zero freshness window should be rejected");
    }

    #[test]
    fn test_settings_duplicate_app_id() {
        let result = Settings::from_toml(
            r#"
            [clients.one]
            app_id = "same"
            app_secret = "a"

            [clients.two]
            app_id = "same"
            app_secret = "b"
            "#,
        );
        let err = result.expect_err("duplicate app ids should be rejected");
        assert!(err.to_string().contains("reuses app_id"));
    }

    #[test]
    fn test_settings_unknown_default_client() {
        let result = Settings::from_toml(r#"default_client = "missing""#);
        assert!(result.is_err(), "Unknown default client should be rejected");
    }

    #[test]
    fn test_settings_invalid_toml_syntax() {
        let result = Settings::from_toml("[clients.only\napp_id = \"id\"");
        assert!(result.is_err(), "Should fail with invalid TOML syntax");
    }

    #[test]
    fn test_cert_pem_from_strings() {
        let settings = Settings::from_toml(
            r#"
            [clients.off]
            app_id = "a"
            app_secret = "s"
            https_cert_pem = "false"

            [clients.on]
            app_id = "b"
            app_secret = "s"
            https_cert_pem = false
            "#,
        )
        .expect("settings should parse");

        assert_eq!(
            settings.clients["off"].https_cert_pem,
            CertPem::Enabled(false)
        );
        assert_eq!(
            settings.clients["on"].https_cert_pem,
            CertPem::Enabled(false)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let settings =
            Settings::from_toml(&crate_test_settings_str()).expect("test settings should parse");
        let debug = format!("{settings:?}");
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_canonical_toml_round_trips() {
        let settings =
            Settings::from_toml(&crate_test_settings_str()).expect("test settings should parse");
        let toml = settings
            .to_canonical_toml()
            .expect("settings should serialize");
        let reparsed = Settings::from_toml(&toml).expect("serialized settings should parse");
        assert_eq!(reparsed.clients.len(), settings.clients.len());
        assert_eq!(
            reparsed.clients["pinned"].https_cert_pem,
            settings.clients["pinned"].https_cert_pem
        );
    }

    #[test]
    fn test_set_env() {
        // Only the cache timeout is overridden so parallel tests are unaffected.
        temp_env::with_var(
            "API_SIGNATURE__SIGNATURE__NONCE_CACHE_TIMEOUT_MS",
            Some("750"),
            || {
                let settings = Settings::from_toml(&crate_test_settings_str());

                assert!(settings.is_ok(), "Settings should load with env override");
                assert_eq!(
                    settings
                        .expect("settings should load")
                        .signature
                        .nonce_cache_timeout(),
                    Duration::from_millis(750)
                );
            },
        );
    }
}
