use crate::discovery::DiscoveryConfig;
use crate::playback::PlaybackConfig;
use config::{Config, File};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend: String,
    pub espeak_binary: String,
    pub log_level: String,
    // Discovery retry policy
    pub max_discovery_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_cap_ms: u64,
    pub probe_refresh_delay_ms: u64,
    pub probe_notify_delay_ms: u64,
    pub reload_delay_ms: u64,
    // Playback supervision
    pub playback_settle_ms: u64,
    pub min_timeout_ms: u64,
    pub timeout_per_char_ms: u64,
    pub test_restore_delay_ms: u64,
    // Default speech parameters
    pub default_rate: f32,
    pub default_pitch: f32,
    pub default_volume: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: "espeak".to_string(),
            espeak_binary: "espeak-ng".to_string(),
            log_level: "info".to_string(),
            max_discovery_retries: 20,
            backoff_base_ms: 500,
            backoff_factor: 1.3,
            backoff_cap_ms: 3000,
            probe_refresh_delay_ms: 100,
            probe_notify_delay_ms: 200,
            reload_delay_ms: 100,
            playback_settle_ms: 100,
            min_timeout_ms: 10_000,
            timeout_per_char_ms: 100,
            test_restore_delay_ms: 3000,
            default_rate: 1.0,
            default_pitch: 1.0,
            default_volume: 1.0,
        }
    }
}

lazy_static! {
    pub static ref SETTINGS: RwLock<Settings> =
        RwLock::new(Settings::new().unwrap_or_else(|e| {
            eprintln!("Invalid configuration, using defaults: {}", e);
            Settings::default()
        }));
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let user_config = dirs::config_dir()
            .map(|d| d.join("jvoice").join("Jvoice"))
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_default();

        let builder = Self::defaults()?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Jvoice").required(false))
            .add_source(File::with_name(&user_config).required(false))
            // Merge with environment variables (e.g. JVOICE_BACKEND)
            .add_source(config::Environment::with_prefix("JVOICE"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads a specific file on top of the defaults; environment still wins.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings: Settings = Self::defaults()?
            .add_source(File::with_name(path))
            .add_source(config::Environment::with_prefix("JVOICE"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let d = Settings::default();
        Config::builder()
            .set_default("backend", d.backend)?
            .set_default("espeak_binary", d.espeak_binary)?
            .set_default("log_level", d.log_level)?
            .set_default("max_discovery_retries", d.max_discovery_retries)?
            .set_default("backoff_base_ms", d.backoff_base_ms)?
            .set_default("backoff_factor", d.backoff_factor)?
            .set_default("backoff_cap_ms", d.backoff_cap_ms)?
            .set_default("probe_refresh_delay_ms", d.probe_refresh_delay_ms)?
            .set_default("probe_notify_delay_ms", d.probe_notify_delay_ms)?
            .set_default("reload_delay_ms", d.reload_delay_ms)?
            .set_default("playback_settle_ms", d.playback_settle_ms)?
            .set_default("min_timeout_ms", d.min_timeout_ms)?
            .set_default("timeout_per_char_ms", d.timeout_per_char_ms)?
            .set_default("test_restore_delay_ms", d.test_restore_delay_ms)?
            .set_default("default_rate", d.default_rate as f64)?
            .set_default("default_pitch", d.default_pitch as f64)?
            .set_default("default_volume", d.default_volume as f64)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        validate_speech_params(self.default_rate, self.default_pitch, self.default_volume)?;
        if self.backoff_factor < 1.0 {
            return Err(config::ConfigError::Message(
                "backoff_factor must be at least 1.0".to_string(),
            ));
        }
        if self.max_discovery_retries == 0 {
            return Err(config::ConfigError::Message(
                "max_discovery_retries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            max_retries: self.max_discovery_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_factor: self.backoff_factor,
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            refresh_delay: Duration::from_millis(self.probe_refresh_delay_ms),
            notify_delay: Duration::from_millis(self.probe_notify_delay_ms),
            reload_delay: Duration::from_millis(self.reload_delay_ms),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            settle_delay: Duration::from_millis(self.playback_settle_ms),
            min_timeout: Duration::from_millis(self.min_timeout_ms),
            timeout_per_char: Duration::from_millis(self.timeout_per_char_ms),
        }
    }
}

/// Bounds for rate, pitch and volume, whether they come from config or the
/// command line. NaN fails every range check.
pub fn validate_speech_params(
    rate: f32,
    pitch: f32,
    volume: f32,
) -> Result<(), config::ConfigError> {
    if !(0.0..=1.0).contains(&volume) {
        return Err(config::ConfigError::Message(format!(
            "Invalid volume: {}. Must be between 0.0 and 1.0",
            volume
        )));
    }
    if rate.is_nan() || rate <= 0.0 || rate > 10.0 {
        return Err(config::ConfigError::Message(format!(
            "Invalid rate: {}. Must be in (0.0, 10.0]",
            rate
        )));
    }
    if !(0.0..=2.0).contains(&pitch) {
        return Err(config::ConfigError::Message(format!(
            "Invalid pitch: {}. Must be between 0.0 and 2.0",
            pitch
        )));
    }
    Ok(())
}
