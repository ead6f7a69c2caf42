use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::map::Entry;
use tracing::{info, warn};

use crate::host::CaptureOptions;

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "capture_session.toml";
/// Environment variable pointing at an alternative configuration file.
pub const CONFIG_ENV: &str = "CAPTURE_SESSION_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frame rate hint sent with every capture request.
    pub ideal_frame_rate: f64,
    /// Capture audio alongside video. Always forced off.
    pub capture_audio: bool,
    /// Label used when the host reports none.
    pub default_label: String,
    /// Message stored when a failure carries none.
    pub fallback_error_message: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ideal_frame_rate: 30.0,
            capture_audio: false,
            default_label: "Screen".to_string(),
            fallback_error_message: "Unknown error occurred".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize defaults: {0}")]
    Defaults(#[from] toml::ser::Error),
}

impl CaptureConfig {
    /// Loads the configuration, merging overrides over the defaults.
    ///
    /// Missing or malformed files leave the defaults in place.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(err) => {
                warn!("Falling back to default config: {err}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded capture configuration");
        Ok(config)
    }

    /// Parses overrides and merges them over the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::try_from(Self::default())?;
        let overrides = content.parse::<toml::Value>()?;
        merge_value(&mut merged, overrides);

        let mut config: CaptureConfig = merged.try_into()?;
        config.sanitize();
        Ok(config)
    }

    fn sanitize(&mut self) {
        if self.capture_audio {
            warn!("capture_audio is not supported; capturing video only");
            self.capture_audio = false;
        }

        if !self.ideal_frame_rate.is_finite() || self.ideal_frame_rate <= 0.0 {
            let default = Self::default().ideal_frame_rate;
            warn!(
                ideal_frame_rate = self.ideal_frame_rate,
                default, "ignoring invalid frame rate hint"
            );
            self.ideal_frame_rate = default;
        }
    }

    /// Options for a capture request: video only, with the frame rate hint.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            video: true,
            audio: false,
            ideal_frame_rate: self.ideal_frame_rate,
        }
    }
}

fn merge_value(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base_map), toml::Value::Table(override_map)) => {
            for (key, override_value) in override_map {
                match base_map.entry(key) {
                    Entry::Occupied(mut entry) => merge_value(entry.get_mut(), override_value),
                    Entry::Vacant(entry) => {
                        entry.insert(override_value);
                    }
                }
            }
        }
        (base_value, override_value) => {
            *base_value = override_value;
        }
    }
}
