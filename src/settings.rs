//! # User Settings Store
//!
//! Settings are a flat JSON document of known keys. Missing keys take their
//! defaults, unknown keys are rejected, and every write is validated before it
//! touches the disk so an invalid update leaves the previous file in place.
//!
//! ```json
//! {
//!   "mode": "dashboard",
//!   "city": "San Francisco",
//!   "units": "c",
//!   "interval": 300,
//!   "show_humidity": true,
//!   "show_wind": true,
//!   "show_sun": true,
//!   "rotation": 90,
//!   "flip_h": false,
//!   "flip_v": false,
//!   "auto_update": false
//! }
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::bitmap::Orientation;
pub use crate::bitmap::Rotation;
use crate::persist;

/// Shortest auto-update interval in seconds
pub const MIN_INTERVAL: u32 = 30;
/// Longest auto-update interval in seconds (24 hours)
pub const MAX_INTERVAL: u32 = 86_400;
/// Longest accepted city name
pub const MAX_CITY_LEN: usize = 100;

/// Errors raised while reading or writing settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Unknown key, out-of-range value or wrong type
    #[error("invalid settings: {0}")]
    Validation(String),

    /// Settings file could not be read or written
    #[error("settings IO: {0}")]
    Io(#[from] io::Error),

    /// Settings file is not JSON
    #[error("settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the panel shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Image,
    Dashboard,
}

/// Temperature units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Units {
    #[default]
    Celsius,
    Fahrenheit,
}

impl Units {
    pub fn suffix(self) -> &'static str {
        match self {
            Units::Celsius => "C",
            Units::Fahrenheit => "F",
        }
    }

    /// Convert a Celsius reading into these units.
    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            Units::Celsius => celsius,
            Units::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }
}

impl TryFrom<String> for Units {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "c" | "celsius" => Ok(Units::Celsius),
            "f" | "fahrenheit" => Ok(Units::Fahrenheit),
            other => Err(format!("invalid temperature units '{other}'")),
        }
    }
}

impl From<Units> for String {
    fn from(units: Units) -> Self {
        match units {
            Units::Celsius => "c".to_string(),
            Units::Fahrenheit => "f".to_string(),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Image => write!(f, "image"),
            Mode::Dashboard => write!(f, "dashboard"),
        }
    }
}

/// User-facing options persisted between runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub mode: Mode,
    pub city: String,
    pub units: Units,
    /// Seconds between dashboard refreshes in auto mode
    pub interval: u32,
    pub show_humidity: bool,
    pub show_wind: bool,
    pub show_sun: bool,
    /// Counter-clockwise rotation applied to every frame
    pub rotation: Rotation,
    pub flip_h: bool,
    pub flip_v: bool,
    /// Let a running `auto` loop redraw the dashboard. Off pauses it
    pub auto_update: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mode: Mode::Image,
            city: "San Francisco".to_string(),
            units: Units::Celsius,
            interval: 300,
            show_humidity: true,
            show_wind: true,
            show_sun: true,
            rotation: Rotation::Deg90,
            flip_h: false,
            flip_v: false,
            auto_update: false,
        }
    }
}

impl Settings {
    /// Check range constraints that the type system does not carry.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&self.interval) {
            return Err(SettingsError::Validation(format!(
                "interval must be between {MIN_INTERVAL} and {MAX_INTERVAL} seconds, got {}",
                self.interval
            )));
        }
        if self.city.trim().chars().count() > MAX_CITY_LEN {
            return Err(SettingsError::Validation("city name too long".into()));
        }
        Ok(())
    }

    /// Rotation and flips as one value.
    pub fn orientation(&self) -> Orientation {
        Orientation {
            rotation: self.rotation,
            flip_h: self.flip_h,
            flip_v: self.flip_v,
        }
    }

    /// Parse a JSON document, rejecting unknown keys and bad values.
    pub fn from_json_value(value: Value) -> Result<Self, SettingsError> {
        let mut settings: Settings = serde_json::from_value(value)
            .map_err(|e| SettingsError::Validation(e.to_string()))?;
        settings.city = settings.city.trim().to_string();
        settings.validate()?;
        Ok(settings)
    }

    /// Build a JSON patch from `key=value` pairs. Values that parse as JSON
    /// (`true`, `90`) keep their type, anything else is a string.
    pub fn patch_from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Value, SettingsError> {
        let mut patch = Map::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                SettingsError::Validation(format!("expected key=value, got '{pair}'"))
            })?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.into()));
            patch.insert(key.trim().to_string(), value);
        }
        Ok(Value::Object(patch))
    }
}

/// File-backed settings.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings file. A missing file yields the defaults; a file
    /// missing some keys is completed from the defaults.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };
        let value: Value = serde_json::from_slice(&data)?;
        Settings::from_json_value(value)
    }

    /// Like [`load`](Self::load) but logs and falls back to the defaults.
    pub fn load_or_default(&self) -> Settings {
        self.load().unwrap_or_else(|e| {
            warn!("Could not load settings from {}: {}", self.path.display(), e);
            Settings::default()
        })
    }

    /// Validate, then replace the settings file atomically.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        let data = serde_json::to_vec_pretty(settings)?;
        persist::write_atomic(&self.path, &data)?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// Merge a partial JSON object into the stored settings and save.
    pub fn update(&self, patch: &Value) -> Result<Settings, SettingsError> {
        let patch = patch.as_object().ok_or_else(|| {
            SettingsError::Validation("settings update must be a JSON object".into())
        })?;

        // An unreadable file is reported, not replaced by defaults
        let current = self.load()?;
        let Value::Object(mut merged) = serde_json::to_value(&current)? else {
            return Err(SettingsError::Validation("stored settings are not an object".into()));
        };
        for (key, value) in patch {
            if !merged.contains_key(key) {
                return Err(SettingsError::Validation(format!("unknown setting '{key}'")));
            }
            merged.insert(key.clone(), value.clone());
        }

        let updated = Settings::from_json_value(Value::Object(merged))?;
        self.save(&updated)?;
        Ok(updated)
    }

    /// Turn the stored rotation by `delta` degrees (a multiple of 90).
    pub fn rotate_by(&self, delta: i32) -> Result<Settings, SettingsError> {
        let mut settings = self.load()?;
        settings.rotation = settings.rotation.turned_by(delta).ok_or_else(|| {
            SettingsError::Validation(format!(
                "rotation step must be a multiple of 90 degrees, got {delta}"
            ))
        })?;
        self.save(&settings)?;
        Ok(settings)
    }
}
