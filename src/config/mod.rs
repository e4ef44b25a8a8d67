//! Configuration management for Murmur

pub mod file;

use std::time::Duration;

use url::Url;

use crate::{Error, Result};
use file::MurmurConfigFile;

/// Default inference backend origin
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Default readiness poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default per-request timeout (model inference can be slow on first use)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default capture sample rate (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Murmur client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Inference backend connection
    pub backend: BackendConfig,

    /// Voice configuration
    pub voice: VoiceConfig,
}

/// Inference backend connection settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend origin; relative audio URLs resolve against it
    pub url: Url,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Interval between readiness probes while models are loading
    pub poll_interval: Duration,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone capture and speaker playback
    pub enabled: bool,

    /// Start sessions muted (no synthesis or playback)
    pub start_muted: bool,

    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_muted: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Command-line overrides applied on top of env and file configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Backend origin
    pub backend_url: Option<String>,

    /// Force voice off (headless machines)
    pub disable_voice: bool,

    /// Start muted
    pub muted: bool,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if the resolved backend URL is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(&ConfigOverrides::default())
    }

    /// Load configuration with explicit command-line overrides
    ///
    /// # Errors
    ///
    /// Returns error if the resolved backend URL is invalid
    pub fn load_with_options(overrides: &ConfigOverrides) -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok(), overrides)
    }

    /// Resolve configuration with priority: overrides > env > toml > default
    ///
    /// # Errors
    ///
    /// Returns error if the resolved backend URL is invalid
    pub fn resolve(
        fc: MurmurConfigFile,
        env: impl Fn(&str) -> Option<String>,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let raw_url = overrides
            .backend_url
            .clone()
            .or_else(|| env("MURMUR_BACKEND_URL"))
            .or(fc.backend.url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let url = parse_backend_url(&raw_url)?;

        let request_timeout = env("MURMUR_REQUEST_TIMEOUT")
            .and_then(|s| s.parse().ok())
            .or(fc.backend.request_timeout_secs)
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);

        let poll_interval = env("MURMUR_POLL_INTERVAL")
            .and_then(|s| s.parse().ok())
            .or(fc.backend.poll_interval_secs)
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs);

        let env_disabled = env("MURMUR_DISABLE_VOICE")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let voice_enabled = if overrides.disable_voice || env_disabled {
            false
        } else {
            fc.voice.enabled.unwrap_or(true)
        };

        if !voice_enabled {
            tracing::info!("voice disabled, text-only mode");
        }

        let voice = VoiceConfig {
            enabled: voice_enabled,
            start_muted: overrides.muted || fc.voice.start_muted.unwrap_or(false),
            sample_rate: fc
                .voice
                .sample_rate
                .filter(|rate| *rate > 0)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
        };

        Ok(Self {
            backend: BackendConfig {
                url,
                request_timeout,
                poll_interval,
            },
            voice,
        })
    }
}

/// Parse a backend origin, requiring an http(s) scheme and no path
///
/// Endpoint paths are absolute, so a path prefix would be dropped silently.
fn parse_backend_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "backend url must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.path() != "/" || url.query().is_some() {
        return Err(Error::Config(format!(
            "backend url must be a bare origin such as http://host:5000, got '{url}'"
        )));
    }
    Ok(url)
}
