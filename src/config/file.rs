//! TOML configuration file loading
//!
//! Supports `~/.config/murmur/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MurmurConfigFile {
    /// Inference backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,
}

/// Inference backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Backend origin (e.g. "http://localhost:5000")
    pub url: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,

    /// Readiness poll interval in seconds
    pub poll_interval_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable microphone and speaker use
    pub enabled: Option<bool>,

    /// Start sessions with spoken replies muted
    pub start_muted: Option<bool>,

    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `MurmurConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MurmurConfigFile {
    config_file_path().map_or_else(MurmurConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `MurmurConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> MurmurConfigFile {
    if !path.exists() {
        return MurmurConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MurmurConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MurmurConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/murmur/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("murmur").join("config.toml"))
}
