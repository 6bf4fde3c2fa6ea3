//! Configuration commands.
//!
//! Settings are loaded from a TOML file and merged with environment variables
//! prefixed with `API_SIGNATURE__`. For example,
//! `API_SIGNATURE__CLIENTS__BILLING__HOST` overrides `clients.billing.host`.

use std::fs;
use std::path::Path;

use api_signature_common::settings::Settings;

use crate::error::CliError;
use crate::hash::compute_settings_hash;

/// Load settings from a TOML file, apply environment overrides and validate.
///
/// Returns the settings together with their canonical TOML rendering.
pub(crate) fn load_and_merge_config(
    file: &Path,
    verbose: bool,
) -> Result<(Settings, String), CliError> {
    let content = fs::read_to_string(file)?;

    if verbose {
        log::info!("Loading config from: {}", file.display());
        log::info!("Environment variables with API_SIGNATURE__ prefix will be merged");
    }

    let settings = Settings::from_toml(&content)
        .map_err(|e| CliError::Config(format!("Failed to parse and merge config: {:?}", e)))?;

    let merged_toml = settings
        .to_canonical_toml()
        .map_err(|e| CliError::Config(format!("Failed to serialize merged config: {e:?}")))?;

    Ok((settings, merged_toml))
}

/// Validate a settings file and print a summary.
///
/// Secrets are never printed.
pub fn validate(file: &Path, verbose: bool) -> Result<(), CliError> {
    let (settings, merged_toml) = load_and_merge_config(file, verbose)?;
    let hash = compute_settings_hash(&merged_toml);

    println!("Configuration is valid");
    println!("  File: {}", file.display());
    println!("  Hash: {}", hash);
    println!("  Identity: {}", settings.identity);
    println!(
        "  Freshness window: {}s",
        settings.signature.freshness_window_secs
    );
    if let Some(default) = &settings.default_client {
        println!("  Default client: {}", default);
    }

    println!("\nClients:");
    for (name, client) in &settings.clients {
        let target = match (&client.host, &client.ip) {
            (Some(host), Some(ip)) => format!("{}://{} via {}", client.scheme, host, ip),
            (Some(host), None) => format!("{}://{}", client.scheme, host),
            (None, _) => "credential only".to_string(),
        };
        println!("  - {} (app_id {}): {}", name, client.app_id, target);
    }

    if verbose {
        let value: toml::Value = toml::from_str(&merged_toml)?;
        if let Some(table) = value.as_table() {
            println!("\nSections found:");
            for key in table.keys() {
                println!("  - [{}]", key);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub(crate) const TEST_CONFIG: &str = r#"
identity = "cli-test"
default_client = "billing"

[signature]
freshness_window_secs = 10

[clients.billing]
app_id = "abc"
app_secret = "topsecret"
host = "api.example.com"

[clients.inbound-only]
app_id = "partner"
app_secret = "partner-secret"
"#;

    pub(crate) fn create_test_config(dir: &TempDir) -> PathBuf {
        let config_path = dir.path().join("test-config.toml");
        fs::write(&config_path, TEST_CONFIG).expect("should write test config");
        config_path
    }

    #[test]
    fn test_validate_valid_config() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = create_test_config(&dir);

        assert!(validate(&config_path, false).is_ok());
        assert!(validate(&config_path, true).is_ok());
    }

    #[test]
    fn test_load_returns_canonical_toml_without_losing_clients() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = create_test_config(&dir);

        let (settings, merged) =
            load_and_merge_config(&config_path, false).expect("config should load");
        assert_eq!(settings.clients.len(), 2);
        assert!(merged.contains("[clients.billing]"));
    }

    #[test]
    fn test_validate_invalid_toml() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = dir.path().join("invalid.toml");
        fs::write(&config_path, "invalid { toml").expect("should write file");

        assert!(validate(&config_path, false).is_err());
    }

    #[test]
    fn test_validate_missing_secret() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = dir.path().join("incomplete.toml");
        fs::write(&config_path, "[clients.only]\napp_id = \"abc\"\n").expect("should write file");

        let err = validate(&config_path, false).expect_err("missing secret should fail");
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_validate_nonexistent_file() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = dir.path().join("nonexistent.toml");

        let err = validate(&config_path, false).expect_err("missing file should fail");
        assert!(matches!(err, CliError::Io(_)));
    }
}
