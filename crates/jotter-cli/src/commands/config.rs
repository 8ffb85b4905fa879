//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use jotter_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, api_url, api_token, owner_id, sync_interval_secs, \
                          max_attempts, request_timeout_secs, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let token = config.api_token.as_deref().map(mask);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "api_token": token,
                    "owner_id": config.owner_id,
                    "sync_interval_secs": config.sync_interval_secs,
                    "max_attempts": config.max_attempts,
                    "request_timeout_secs": config.request_timeout_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!("  api_url:              {}", or_unset(config.api_url.as_deref()));
            println!("  api_token:            {}", or_unset(token.as_deref()));
            println!("  owner_id:             {}", or_unset(config.owner_id.as_deref()));
            println!("  sync_interval_secs:   {}", config.sync_interval_secs);
            println!("  max_attempts:         {}", config.max_attempts);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply_setting(&mut config, &key, &value)?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "api_token" { mask(&value) } else { value };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

/// Update one field of `config` from its string form
///
/// "none" or an empty value clears optional keys.
fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => config.api_url = optional(value),
        "api_token" => config.api_token = optional(value),
        "owner_id" => config.owner_id = optional(value),
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        "sync_interval_secs" => {
            config.sync_interval_secs = parse_number(key, value)?;
        }
        "max_attempts" => {
            config.max_attempts = parse_number(key, value)?;
        }
        "request_timeout_secs" => {
            config.request_timeout_secs = parse_number(key, value)?;
        }
        _ => bail!(
            "Unknown configuration key: '{}'\nValid keys: {}",
            key,
            VALID_KEYS
        ),
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.parse() {
        Ok(n) => Ok(n),
        Err(_) => bail!("Invalid value for {}: '{}' is not a positive number", key, value),
    }
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}

/// Keep the last four characters of a secret
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_optional_keys() {
        let mut config = Config::default();

        apply_setting(&mut config, "api_url", "https://notes.example.com").unwrap();
        apply_setting(&mut config, "api_token", "secret").unwrap();
        assert!(config.is_sync_configured());

        apply_setting(&mut config, "api_token", "none").unwrap();
        assert!(config.api_token.is_none());

        apply_setting(&mut config, "log_file", "/tmp/jotter.log").unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/jotter.log")));
        apply_setting(&mut config, "log_file", "").unwrap();
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_apply_numbers() {
        let mut config = Config::default();

        apply_setting(&mut config, "max_attempts", "3").unwrap();
        apply_setting(&mut config, "sync_interval_secs", "15").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.sync_interval_secs, 15);

        assert!(apply_setting(&mut config, "max_attempts", "lots").is_err());
        assert!(apply_setting(&mut config, "request_timeout_secs", "-1").is_err());
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_unknown_key() {
        let mut config = Config::default();
        let err = apply_setting(&mut config, "sync_url", "x").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("supersecret"), "****cret");
    }
}
