//! # Frame Service
//!
//! Ties settings, the image pipeline, the dashboard and the display adapter
//! into the operations the front-end exposes. Each operation either puts a
//! complete frame on the panel or fails before touching it.
//!
//! | operation | effect |
//! |---|---|
//! | [`Frame::upload`] | process a photo, cache its base image, display |
//! | [`Frame::preview`] | process a photo into the resize preview only |
//! | [`Frame::refresh`] | re-orient the cached base image and display |
//! | [`Frame::rotate`] | turn the stored rotation, redraw the current mode |
//! | [`Frame::update_settings`] | validated settings patch, redraw the current mode |
//! | [`Frame::render_dashboard`] | fetch weather, draw the dashboard, display |
//! | [`Frame::run_auto`] | redraw the dashboard every `interval` seconds |

use std::future::Future;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::bitmap::DisplayBitmap;
use crate::config::Config;
use crate::dashboard::{DashboardData, DashboardRenderer};
use crate::display::{DisplayError, DisplayManager};
use crate::geometry::{self, CropSpec, GeometryError, Pipeline};
use crate::settings::{Mode, Settings, SettingsError, SettingsStore, MIN_INTERVAL};
use crate::weather::{WeatherClient, WeatherError};

/// Largest accepted upload (10 MiB)
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Errors returned by frame operations.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Weather(#[from] WeatherError),

    /// Preview could not be written
    #[error("preview image: {0}")]
    Image(#[from] image::ImageError),

    /// Upload exceeds [`MAX_UPLOAD_BYTES`]
    #[error("upload is {size} bytes, limit is {limit}")]
    UploadTooLarge { size: usize, limit: usize },

    /// No image has been uploaded yet
    #[error("no image to refresh")]
    NothingToRefresh,
}

/// The e-paper frame: one panel plus its settings.
pub struct Frame {
    config: Config,
    store: SettingsStore,
    pipeline: Pipeline,
    renderer: DashboardRenderer,
    weather: WeatherClient,
    display: DisplayManager,
}

impl Frame {
    pub fn new(config: Config, display: DisplayManager) -> Result<Self, FrameError> {
        let store = SettingsStore::new(config.paths.settings.clone());
        let pipeline = Pipeline::new(&config.display);
        let renderer = DashboardRenderer::new(config.display.width, config.display.height);
        let weather = WeatherClient::new(&config.weather)?;
        Ok(Self {
            config,
            store,
            pipeline,
            renderer,
            weather,
            display,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn display(&self) -> &DisplayManager {
        &self.display
    }

    /// Current settings, defaults if the file is unreadable.
    pub fn settings(&self) -> Settings {
        self.store.load_or_default()
    }

    fn process(
        &self,
        bytes: &[u8],
        crop: &CropSpec,
    ) -> Result<(image::GrayImage, DisplayBitmap), FrameError> {
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(FrameError::UploadTooLarge {
                size: bytes.len(),
                limit: MAX_UPLOAD_BYTES,
            });
        }
        let source = geometry::decode_image(bytes)?;
        let orientation = self.settings().orientation();
        Ok(self.pipeline.process(&source, crop, &orientation)?)
    }

    /// Process an uploaded photo and show it.
    pub fn upload(&self, bytes: &[u8], crop: &CropSpec) -> Result<DisplayBitmap, FrameError> {
        let (base, bitmap) = self.process(bytes, crop)?;
        geometry::save_base(&base, &self.config.paths.current_image_base)?;
        self.display.display(&bitmap)?;
        info!(
            "Displayed upload ({}x{} base, scale {})",
            base.width(),
            base.height(),
            crop.scale
        );
        Ok(bitmap)
    }

    /// Process a photo into the resize preview without touching the panel.
    pub fn preview(&self, bytes: &[u8], crop: &CropSpec) -> Result<DisplayBitmap, FrameError> {
        let (_, bitmap) = self.process(bytes, crop)?;
        bitmap.save(&self.config.paths.resize_preview)?;
        debug!(
            "Resize preview written to {}",
            self.config.paths.resize_preview.display()
        );
        Ok(bitmap)
    }

    /// Re-apply the current orientation to the cached base image.
    pub fn refresh(&self) -> Result<DisplayBitmap, FrameError> {
        let base = geometry::load_base(&self.config.paths.current_image_base)?
            .ok_or(FrameError::NothingToRefresh)?;
        let bitmap = self
            .pipeline
            .reprocess(&base, &self.settings().orientation())?;
        self.display.display(&bitmap)?;
        Ok(bitmap)
    }

    /// Draw the dashboard for `now` without displaying it. Weather failures
    /// produce the offline dashboard.
    pub async fn dashboard_bitmap(&self, now: NaiveDateTime) -> DisplayBitmap {
        let settings = self.settings();
        let options = settings.dashboard_options();
        match self.weather.fetch(&settings.city).await {
            Ok(snapshot) => self
                .renderer
                .render(&DashboardData::Live(&snapshot), &options, now),
            Err(e) => {
                warn!("Weather unavailable for {:?}: {}", settings.city, e);
                self.renderer
                    .render(&DashboardData::Unavailable(e.to_string()), &options, now)
            }
        }
    }

    /// Fetch weather, draw the dashboard and show it.
    pub async fn render_dashboard(&self) -> Result<DisplayBitmap, FrameError> {
        let bitmap = self.dashboard_bitmap(Local::now().naive_local()).await;
        bitmap.save(&self.config.paths.dashboard_preview)?;
        self.display.display(&bitmap)?;
        Ok(bitmap)
    }

    /// One auto-update cycle. Skipped rather than queued when another
    /// render holds the panel.
    async fn auto_refresh(&self) -> Result<(), FrameError> {
        if self.display.is_busy() {
            debug!("Panel busy, skipping auto-update");
            return Ok(());
        }
        let bitmap = self.dashboard_bitmap(Local::now().naive_local()).await;
        bitmap.save(&self.config.paths.dashboard_preview)?;
        match self.display.try_display(&bitmap) {
            Ok(()) => {
                info!("Auto-update: dashboard displayed");
                Ok(())
            }
            Err(DisplayError::Busy) => {
                debug!("Panel busy, auto-update frame dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Redraw whatever the current mode shows. In image mode with nothing
    /// uploaded yet this is a no-op.
    pub async fn redraw(&self) -> Result<Option<DisplayBitmap>, FrameError> {
        match self.settings().mode {
            Mode::Dashboard => self.render_dashboard().await.map(Some),
            Mode::Image => match self.refresh() {
                Ok(bitmap) => Ok(Some(bitmap)),
                Err(FrameError::NothingToRefresh) => {
                    debug!("No image uploaded yet, nothing to redraw");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Turn the stored rotation by `delta` degrees and redraw.
    pub async fn rotate(&self, delta: i32) -> Result<Settings, FrameError> {
        let settings = self.store.rotate_by(delta)?;
        info!("Rotation now {}°", settings.rotation.degrees());
        if let Err(e) = self.redraw().await {
            warn!("Redraw after rotate failed: {e}");
        }
        Ok(settings)
    }

    /// Apply a partial settings update and redraw.
    pub async fn update_settings(&self, patch: &Value) -> Result<Settings, FrameError> {
        let settings = self.store.update(patch)?;
        if let Some(keys) = patch.as_object() {
            info!("Settings updated: {:?}", keys.keys().collect::<Vec<_>>());
        }
        if let Err(e) = self.redraw().await {
            warn!("Redraw after settings change failed: {e}");
        }
        Ok(settings)
    }

    pub fn clear(&self) {
        self.display.clear();
    }

    pub fn sleep(&self) {
        self.display.sleep();
    }

    /// Keep the dashboard current until `shutdown` resolves. Settings are
    /// re-read each cycle, so `auto_update`, mode and interval changes apply
    /// on the next wake-up. Nothing is drawn while `auto_update` is off or
    /// the frame is in image mode.
    pub async fn run_auto<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Auto-update loop started");
        loop {
            let settings = self.settings();
            if !settings.auto_update {
                debug!("auto_update is off, idle");
            } else if settings.mode != Mode::Dashboard {
                debug!("Image mode, auto-update idle");
            } else if let Err(e) = self.auto_refresh().await {
                error!("Auto-update error: {e}");
            }

            let wait = Duration::from_secs(u64::from(settings.interval.max(MIN_INTERVAL)));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => break,
            }
        }
        info!("Auto-update loop stopped");
    }
}
