//! # ePaper Frame Core Library
//!
//! This library drives a Waveshare 2.13" e-paper panel (250×122 logical pixels)
//! from a Raspberry Pi. It turns either an uploaded photo or a live weather
//! dashboard into a single 1-bit frame and pushes that frame to the panel.
//!
//! ## Design Philosophy
//!
//! ### One artifact reaches the hardware
//! Every render path ends in a [`DisplayBitmap`]: a packed 1-bit raster whose
//! dimensions are checked against the configured panel before any SPI traffic.
//! Nothing else is ever handed to the display adapter, so a failed decode or a
//! bad crop can never leave half a frame on the glass.
//!
//! ### Request-scoped pipelines
//! Crop parameters and weather readings live only for the duration of one
//! render. The only durable state is the settings document, the last frame
//! shown and the pre-threshold base image kept for re-rotation. All of them
//! are written with replace-on-write so a power cut never truncates them.
//!
//! ### Hardware is optional
//! Without the `hardware` feature (or without `/dev/spidev0.0`) the adapter
//! falls back to demo mode and writes each frame to a preview file instead.
//!
//! ## Data Flow
//! 1. **Image**: decode → scale → crop → letterbox → rotate → flip → 1-bit → display
//! 2. **Dashboard**: geocode + forecast → layout → rotate → flip → display
//! 3. **Offline**: weather failure renders a marked placeholder, never a blank frame
//!
//! ## Modules
//! - [`config`]: process-wide configuration loaded once at start-up
//! - [`settings`]: user settings persisted as JSON
//! - [`weather`]: Open-Meteo client producing a [`weather::WeatherSnapshot`]
//! - [`geometry`]: image crop/scale/rotate pipeline
//! - [`dashboard`]: weather dashboard layout
//! - [`display`]: device adapter with hardware and demo variants
//! - [`frame`]: orchestration of the above into user-facing operations

pub mod bitmap;
pub mod config;
pub mod dashboard;
pub mod display;
pub mod frame;
pub mod geometry;
#[cfg(all(target_os = "linux", feature = "hardware"))]
pub mod hardware;
pub mod logging;
mod persist;
pub mod settings;
pub mod weather;

pub use bitmap::DisplayBitmap;
pub use config::Config;
pub use settings::{Rotation, Settings};

// Crate-level test suite
#[cfg(test)]
mod tests;
