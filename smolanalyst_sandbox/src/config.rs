//! # Sandbox Configuration
//!
//! Settings for a sandbox scope, loaded from a TOML file and overridable from
//! the command line.
//!
//! ```toml
//! # Directory writes are confined to. Defaults to the working directory.
//! root_directory = "/work/session-42"
//!
//! # Whether the platform temp directory is writable too.
//! tmp_exempt = true
//!
//! # Which layers are installed: "gate", "surface" or "both".
//! enforcement = "both"
//!
//! # Rendering backend forced while the sandbox is active.
//! headless_backend = "agg"
//! ```
//!
//! Unknown keys are rejected so that a misspelled setting cannot silently
//! weaken the sandbox.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::render::HEADLESS_BACKEND;
use crate::scope::Enforcement;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    #[serde(default)]
    pub root_directory: Option<PathBuf>,
    #[serde(default = "default_tmp_exempt")]
    pub tmp_exempt: bool,
    #[serde(default)]
    pub enforcement: Enforcement,
    #[serde(default = "default_headless_backend")]
    pub headless_backend: String,
}

fn default_tmp_exempt() -> bool {
    true
}

fn default_headless_backend() -> String {
    HEADLESS_BACKEND.to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root_directory: None,
            tmp_exempt: default_tmp_exempt(),
            enforcement: Enforcement::default(),
            headless_backend: default_headless_backend(),
        }
    }
}

impl SandboxConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        if config.headless_backend.trim().is_empty() {
            anyhow::bail!("headless_backend must not be empty");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = SandboxConfig::from_toml("").unwrap();
        assert_eq!(config, SandboxConfig::default());
        assert!(config.tmp_exempt);
        assert_eq!(config.enforcement, Enforcement::Both);
        assert_eq!(config.headless_backend, "agg");
    }

    #[test]
    fn test_values_are_read() {
        let config = SandboxConfig::from_toml(
            r#"
            root_directory = "/work"
            tmp_exempt = false
            enforcement = "surface"
            "#,
        )
        .unwrap();
        assert_eq!(config.root_directory, Some(PathBuf::from("/work")));
        assert!(!config.tmp_exempt);
        assert_eq!(config.enforcement, Enforcement::Surface);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(SandboxConfig::from_toml("allow_overwrite = true").is_err());
    }

    #[test]
    fn test_empty_backend_is_rejected() {
        assert!(SandboxConfig::from_toml("headless_backend = \"\"").is_err());
    }
}
