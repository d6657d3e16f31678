//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! `epaper-config.toml` file. It provides a centralized way to configure panel
//! geometry, file locations, the weather service and GPIO wiring.
//!
//! Configuration is loaded once at process start. Values come from, in order
//! of precedence:
//! 1. `EPAPER_*` environment variables (see [`Config::apply_env`])
//! 2. the TOML file
//! 3. the defaults documented on each field

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::bitmap::DitherMode;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "epaper-config.toml";

/// Application configuration loaded from epaper-config.toml
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Panel geometry and 1-bit conversion
    pub display: DisplayConfig,
    /// Where durable state and previews are written
    pub paths: PathsConfig,
    /// Weather service settings
    pub weather: WeatherConfig,
    /// SPI/GPIO wiring of the panel
    pub hardware: HardwareConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Display and 1-bit conversion configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Logical frame width in pixels (landscape 2.13" panel)
    pub width: u32,
    /// Logical frame height in pixels
    pub height: u32,
    /// Grayscale to 1-bit method for photos
    pub dither: DitherMode,
    /// Luminance cut used by `dither = "threshold"`
    pub threshold: u8,
}

/// File locations for durable state and previews
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// User settings document
    pub settings: PathBuf,
    /// Last frame sent to the display
    pub current_image: PathBuf,
    /// Pre-threshold base image kept for re-rotation
    pub current_image_base: PathBuf,
    /// Last rendered dashboard
    pub dashboard_preview: PathBuf,
    /// Output of `preview` requests
    pub resize_preview: PathBuf,
    /// Frame written by the demo device when no panel is attached
    pub demo_output: PathBuf,
}

/// Open-Meteo client configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Geocoding search endpoint
    pub geocoding_url: String,
    /// Forecast endpoint
    pub forecast_url: String,
}

/// Waveshare HAT wiring (BCM GPIO numbers)
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// SPI device node, chip select handled by the kernel
    pub spi_device: PathBuf,
    /// GPIO character device
    pub gpio_chip: PathBuf,
    /// Data/Command pin
    pub dc_pin: u32,
    /// Reset pin
    pub rst_pin: u32,
    /// Busy pin
    pub busy_pin: u32,
    /// SPI clock in Hz
    pub spi_speed_hz: u32,
}

/// Logging configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            width: 250,  // Waveshare 2.13" V4, landscape
            height: 122, // Waveshare 2.13" V4, landscape
            dither: DitherMode::FloydSteinberg,
            threshold: 128,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            settings: "/tmp/epaper_settings.json".into(),
            current_image: "/tmp/current_epaper.bmp".into(),
            current_image_base: "/tmp/current_epaper_base.png".into(),
            dashboard_preview: "/tmp/dashboard_preview.bmp".into(),
            resize_preview: "/tmp/resize_preview.bmp".into(),
            demo_output: "/tmp/epaper_demo.bmp".into(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            timeout_secs: 15,
            user_agent: "EpaperDashboard/1.0".to_string(),
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        HardwareConfig {
            spi_device: "/dev/spidev0.0".into(),
            gpio_chip: "/dev/gpiochip0".into(),
            dc_pin: 25,
            rst_pin: 17,
            busy_pin: 24,
            spi_speed_hz: 4_000_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from epaper-config.toml (or `EPAPER_CONFIG`), then
    /// apply environment overrides.
    pub fn load() -> Self {
        let path = std::env::var("EPAPER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let mut config = Self::load_from_path(path);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Invalid config file format in {}: {}", path.display(), e);
                    warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                info!(
                    "No config file at {}, using default configuration",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Apply the recognised `EPAPER_*` overrides. Unparseable numbers are
    /// ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number<T: std::str::FromStr>(key: &str, raw: String) -> Option<T> {
            let parsed = raw.trim().parse().ok();
            if parsed.is_none() {
                warn!("Ignoring {key}={raw}: not a number");
            }
            parsed
        }

        if let Some(v) = lookup("EPAPER_WIDTH").and_then(|v| number("EPAPER_WIDTH", v)) {
            self.display.width = v;
        }
        if let Some(v) = lookup("EPAPER_HEIGHT").and_then(|v| number("EPAPER_HEIGHT", v)) {
            self.display.height = v;
        }
        if let Some(v) = lookup("EPAPER_CURRENT_IMAGE") {
            self.paths.current_image = v.into();
        }
        if let Some(v) = lookup("EPAPER_CURRENT_IMAGE_BASE") {
            self.paths.current_image_base = v.into();
        }
        if let Some(v) = lookup("EPAPER_SETTINGS_PATH") {
            self.paths.settings = v.into();
        }
        if let Some(v) = lookup("EPAPER_DASHBOARD_PREVIEW") {
            self.paths.dashboard_preview = v.into();
        }
        if let Some(v) = lookup("EPAPER_LOG_FILE") {
            self.logging.file = Some(v.into());
        }
        if let Some(v) = lookup("EPAPER_LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) =
            lookup("EPAPER_WEATHER_TIMEOUT").and_then(|v| number("EPAPER_WEATHER_TIMEOUT", v))
        {
            self.weather.timeout_secs = v;
        }
        if let Some(v) = lookup("EPAPER_USER_AGENT") {
            self.weather.user_agent = v;
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.display.width, 250);
        assert_eq!(config.display.height, 122);
        assert_eq!(config.display.dither, DitherMode::FloydSteinberg);
        assert_eq!(config.weather.timeout_secs, 15);
        assert_eq!(config.hardware.busy_pin, 24);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.display.width, parsed.display.width);
        assert_eq!(config.paths.settings, parsed.paths.settings);
        assert_eq!(config.weather.user_agent, parsed.weather.user_agent);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[display]
dither = "threshold"
threshold = 100

[paths]
settings = "/var/lib/epaper/settings.json"
"#,
        )
        .unwrap();
        assert_eq!(parsed.display.dither, DitherMode::Threshold);
        assert_eq!(parsed.display.threshold, 100);
        assert_eq!(parsed.display.width, 250);
        assert_eq!(
            parsed.paths.settings,
            PathBuf::from("/var/lib/epaper/settings.json")
        );
        assert_eq!(
            parsed.paths.current_image,
            PathBuf::from("/tmp/current_epaper.bmp")
        );
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.display.width, 250);
    }

    #[test]
    fn test_load_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "display = [not valid").unwrap();
        let config = Config::load_from_path(&path);
        assert_eq!(config.display.height, 122);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("EPAPER_WIDTH", "296"),
            ("EPAPER_HEIGHT", "oops"),
            ("EPAPER_SETTINGS_PATH", "/data/settings.json"),
            ("EPAPER_LOG_LEVEL", "DEBUG"),
            ("EPAPER_WEATHER_TIMEOUT", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.display.width, 296);
        assert_eq!(config.display.height, 122);
        assert_eq!(config.paths.settings, PathBuf::from("/data/settings.json"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.weather.timeout_secs, 5);
    }
}
