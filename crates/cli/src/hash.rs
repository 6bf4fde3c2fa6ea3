//! Hash computation for settings files.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::load_and_merge_config;
use crate::error::CliError;
use crate::HashFormat;

/// SHA-256 of settings text, formatted as `sha256:<hex>`.
///
/// Line endings are normalized to LF so the hash is stable across platforms.
pub fn compute_settings_hash(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Hash of the file exactly as stored, without environment overrides.
pub fn compute_file_hash(path: &Path) -> Result<String, CliError> {
    let content = fs::read_to_string(path)?;
    Ok(compute_settings_hash(&content))
}

/// Compare a computed hash with the one another host reported.
///
/// The `sha256:` prefix is optional and hex digits are matched case-insensitively.
pub fn check_expected(hash: &str, expected: &str) -> Result<(), CliError> {
    let digest = |value: &str| {
        value
            .trim()
            .trim_start_matches("sha256:")
            .to_ascii_lowercase()
    };
    if digest(hash) == digest(expected) {
        Ok(())
    } else {
        Err(CliError::Config(format!(
            "settings hash mismatch: computed {hash}, expected {}",
            expected.trim()
        )))
    }
}

/// Compute and display the hash of a settings file, optionally checking it
/// against the hash of the peer's settings.
pub fn compute_and_display(
    path: &Path,
    format: &HashFormat,
    raw: bool,
    expect: Option<&str>,
    verbose: bool,
) -> Result<(), CliError> {
    let hash = if raw {
        compute_file_hash(path)?
    } else {
        let (_settings, merged_toml) = load_and_merge_config(path, verbose)?;
        compute_settings_hash(&merged_toml)
    };

    match format {
        HashFormat::Text => {
            println!("{}", hash);
        }
        HashFormat::Json => {
            let output = serde_json::json!({
                "file": path.display().to_string(),
                "hash": hash,
                "algorithm": "sha256",
                "matches": expect.map(|expected| check_expected(&hash, expected).is_ok()),
            });
            let rendered = serde_json::to_string_pretty(&output)
                .map_err(|e| CliError::Config(format!("Failed to serialize JSON: {e}")))?;
            println!("{}", rendered);
        }
    }

    match expect {
        Some(expected) => check_expected(&hash, expected),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::create_test_config;
    use tempfile::TempDir;

    #[test]
    fn test_compute_hash() {
        let hash = compute_settings_hash("[clients.a]\napp_id = \"abc\"\n");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), 7 + 64);
    }

    #[test]
    fn test_hash_normalization() {
        assert_eq!(
            compute_settings_hash("line1\nline2\n"),
            compute_settings_hash("line1\r\nline2\r\n")
        );
    }

    #[test]
    fn test_merged_hash_ignores_formatting() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = create_test_config(&dir);
        let (_, merged) = load_and_merge_config(&config_path, false).expect("config should load");

        let reformatted = dir.path().join("reformatted.toml");
        fs::write(&reformatted, format!("# comment\n{merged}")).expect("should write file");
        let (_, merged_again) =
            load_and_merge_config(&reformatted, false).expect("config should load");

        assert_eq!(
            compute_settings_hash(&merged),
            compute_settings_hash(&merged_again)
        );
        assert_ne!(
            compute_file_hash(&config_path).expect("file hash"),
            compute_file_hash(&reformatted).expect("file hash")
        );
    }

    #[test]
    fn test_display_formats() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = create_test_config(&dir);

        assert!(compute_and_display(&config_path, &HashFormat::Text, false, None, false).is_ok());
        assert!(compute_and_display(&config_path, &HashFormat::Json, true, None, false).is_ok());
    }

    #[test]
    fn test_expected_hash_from_peer() {
        let dir = TempDir::new().expect("should create temp dir");
        let config_path = create_test_config(&dir);
        let (_, merged) = load_and_merge_config(&config_path, false).expect("config should load");
        let hash = compute_settings_hash(&merged);

        let bare_upper = hash.trim_start_matches("sha256:").to_ascii_uppercase();
        assert!(check_expected(&hash, &bare_upper).is_ok());
        assert!(compute_and_display(
            &config_path,
            &HashFormat::Text,
            false,
            Some(&hash),
            false
        )
        .is_ok());

        let other = compute_settings_hash("[clients.other]\n");
        assert!(matches!(
            compute_and_display(&config_path, &HashFormat::Json, false, Some(&other), false),
            Err(CliError::Config(ref message)) if message.contains("mismatch")
        ));
    }
}
