//! Launch parameters and configuration
//!
//! Launch parameters are read-only overrides (typically the page query string).
//! `ConciergeConfig` carries the defaults they override and can be loaded from
//! a TOML file.

use crate::selector::ProviderKind;
use crate::vad::{RealtimeMode, VadSettings};
use crate::{ConciergeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Overrides supplied at launch
///
/// Every field is optional; `None` means "use the configured default".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchParams {
    /// Provider override (`provider=`)
    pub provider: Option<String>,
    /// Voice enabled override (`voice=`)
    pub voice: Option<bool>,
    /// Client VAD override (`vad=`)
    pub client_vad: Option<bool>,
    /// Realtime mode override, `a` or `b` (`rtmode=`)
    pub realtime_mode: Option<String>,
    /// Function calling override (`fc=`)
    pub function_calling: Option<bool>,
}

impl LaunchParams {
    /// Parse a query string such as `?provider=gemini&rtmode=b`
    ///
    /// Unknown keys and malformed booleans are ignored.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::default();
        let query = query.trim().trim_start_matches('?');

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let value = value.replace('+', " ");
            let value = value.trim();

            match key.to_ascii_lowercase().as_str() {
                "provider" if !value.is_empty() => params.provider = Some(value.to_string()),
                "voice" => params.voice = parse_flag(value),
                "vad" | "clientvad" => params.client_vad = parse_flag(value),
                "rtmode" if !value.is_empty() => params.realtime_mode = Some(value.to_string()),
                "fc" => params.function_calling = parse_flag(value),
                _ => {}
            }
        }

        params
    }

    /// Set the provider override
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the realtime mode override
    pub fn with_realtime_mode(mut self, mode: impl Into<String>) -> Self {
        self.realtime_mode = Some(mode.into());
        self
    }

    /// Set the client VAD override
    pub fn with_client_vad(mut self, enabled: bool) -> Self {
        self.client_vad = Some(enabled);
        self
    }

    /// Set the voice enabled override
    pub fn with_voice(mut self, enabled: bool) -> Self {
        self.voice = Some(enabled);
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Default configuration for the voice concierge
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    /// Provider used when no override is given (`openai` or `gemini`)
    pub default_provider: String,
    /// Whether voice is enabled when no override is given
    pub voice_enabled: bool,
    /// Whether client VAD is forced on in Mode A
    pub client_vad: bool,
    /// Default realtime mode (`a` = server VAD, `b` = client VAD)
    pub realtime_mode: String,
    /// Whether the property search tool is offered to the model
    pub function_calling: bool,
    /// Delay before an autostart attempt after mount
    pub autostart_debounce_ms: u64,
    /// Provider connection timeout
    pub connect_timeout_ms: u64,
    /// Maximum number of snapshots retained per conversation
    pub snapshot_log_capacity: usize,
    /// Speech probability threshold for client VAD (0.0-1.0)
    pub client_vad_threshold: f32,
    /// Number of silent frames before client VAD reports speech end
    pub client_vad_hangover_frames: u32,
}

impl Default for ConciergeConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            voice_enabled: true,
            client_vad: false,
            realtime_mode: "a".to_string(),
            function_calling: true,
            autostart_debounce_ms: 350,
            connect_timeout_ms: 15_000,
            snapshot_log_capacity: 20,
            client_vad_threshold: 0.5,
            client_vad_hangover_frames: 8,
        }
    }
}

impl ConciergeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConciergeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| ConciergeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ConciergeConfig =
            toml::from_str(content).map_err(|e| ConciergeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if RealtimeMode::parse(&self.realtime_mode).is_none() {
            return Err(ConciergeError::Config(format!(
                "realtime_mode must be 'a' or 'b', got '{}'",
                self.realtime_mode
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConciergeError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.snapshot_log_capacity == 0 {
            return Err(ConciergeError::Config(
                "snapshot_log_capacity must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.client_vad_threshold) {
            return Err(ConciergeError::Config(format!(
                "client_vad_threshold must be within 0.0-1.0, got {}",
                self.client_vad_threshold
            )));
        }
        Ok(())
    }

    /// Set the default provider
    pub fn with_default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = provider.into();
        self
    }

    /// Set whether voice is enabled by default
    pub fn with_voice_enabled(mut self, enabled: bool) -> Self {
        self.voice_enabled = enabled;
        self
    }

    /// Set the autostart debounce
    pub fn with_autostart_debounce_ms(mut self, ms: u64) -> Self {
        self.autostart_debounce_ms = ms;
        self
    }

    /// Set the provider connection timeout
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the snapshot log capacity
    pub fn with_snapshot_log_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_log_capacity = capacity;
        self
    }

    pub fn autostart_debounce(&self) -> Duration {
        Duration::from_millis(self.autostart_debounce_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Fully resolved launch configuration for one widget mount
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LaunchConfig {
    /// Provider that will be armed once selection resolves
    pub provider: ProviderKind,
    /// Whether voice is permitted at all
    pub voice_enabled: bool,
    /// VAD settings handed to the armed provider
    pub vad: VadSettings,
    /// Whether the property search tool is offered to the model
    pub function_calling: bool,
}

impl LaunchConfig {
    /// Merge launch overrides over configured defaults
    pub fn resolve(params: &LaunchParams, config: &ConciergeConfig) -> Self {
        Self {
            provider: ProviderKind::resolve(params.provider.as_deref(), &config.default_provider),
            voice_enabled: params.voice.unwrap_or(config.voice_enabled),
            vad: VadSettings::resolve(params, config),
            function_calling: params.function_calling.unwrap_or(config.function_calling),
        }
    }
}
