//! # Display Driver Adapter
//!
//! The rest of the crate talks to the panel only through [`DisplayManager`],
//! which owns one [`EpdDevice`] chosen at start-up:
//!
//! - **Panel** (`hardware` feature on Linux): the Waveshare 2.13" driver over
//!   spidev and GPIO character devices.
//! - **Demo**: no panel attached; every frame is written to a BMP file so the
//!   output can still be inspected.
//!
//! ## Failure policy
//! - A bitmap whose size differs from the panel is rejected before any
//!   device traffic ([`DisplayError::DimensionMismatch`]).
//! - Device failures during display, clear or sleep are logged and
//!   swallowed; the caller's frame is still persisted as the current image.
//!
//! ## Concurrency
//! Device access is serialised by a mutex. [`DisplayManager::display`] waits
//! for the previous refresh to finish, [`DisplayManager::try_display`]
//! returns [`DisplayError::Busy`] instead.

use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, TryLockError};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::bitmap::DisplayBitmap;
use crate::config::Config;

/// Errors raised by the display adapter.
#[derive(Error, Debug)]
pub enum DisplayError {
    /// Bitmap does not match the panel geometry
    #[error("bitmap is {actual_width}x{actual_height}, panel is {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// No usable panel; the adapter runs in demo mode
    #[error("display hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Another refresh is in progress
    #[error("display busy")]
    Busy,

    /// Panel driver reported an error
    #[error("device error: {0}")]
    Device(String),

    /// File access failed
    #[error("display IO: {0}")]
    Io(#[from] io::Error),

    /// Frame could not be encoded or saved
    #[error("frame image: {0}")]
    Image(#[from] image::ImageError),
}

/// The capabilities of an e-paper panel.
pub trait EpdDevice: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Power up and reset the controller.
    fn init(&mut self) -> Result<(), DisplayError>;

    /// Fill the panel with white.
    fn clear(&mut self) -> Result<(), DisplayError>;

    /// Show one frame.
    fn display(&mut self, bitmap: &DisplayBitmap) -> Result<(), DisplayError>;

    /// Enter deep sleep. `init` must be called again before the next frame.
    fn sleep(&mut self) -> Result<(), DisplayError>;
}

/// Stand-in device that saves frames to an image file.
pub struct DemoDevice {
    output: PathBuf,
    width: u32,
    height: u32,
}

impl DemoDevice {
    pub fn new<P: Into<PathBuf>>(output: P, width: u32, height: u32) -> Self {
        Self {
            output: output.into(),
            width,
            height,
        }
    }
}

impl EpdDevice for DemoDevice {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        DisplayBitmap::new(self.width, self.height).save(&self.output)?;
        Ok(())
    }

    fn display(&mut self, bitmap: &DisplayBitmap) -> Result<(), DisplayError> {
        bitmap.save(&self.output)?;
        info!("Demo mode: frame written to {}", self.output.display());
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        debug!("Demo mode: sleep");
        Ok(())
    }
}

struct DeviceSlot {
    device: Box<dyn EpdDevice>,
    /// Controller is initialised and awake
    ready: bool,
}

impl DeviceSlot {
    fn ensure_ready(&mut self) -> Result<(), DisplayError> {
        if !self.ready {
            self.device.init()?;
            self.ready = true;
        }
        Ok(())
    }
}

/// Exclusive owner of the panel.
pub struct DisplayManager {
    slot: Mutex<DeviceSlot>,
    width: u32,
    height: u32,
    current_image: PathBuf,
    demo: bool,
}

impl DisplayManager {
    /// Wrap a device. `current_image` receives a copy of every frame shown.
    pub fn new(
        device: Box<dyn EpdDevice>,
        width: u32,
        height: u32,
        current_image: PathBuf,
        demo: bool,
    ) -> Self {
        Self {
            slot: Mutex::new(DeviceSlot {
                device,
                ready: false,
            }),
            width,
            height,
            current_image,
            demo,
        }
    }

    /// Demo-mode manager writing to the configured demo output.
    pub fn demo(config: &Config) -> Self {
        let device = DemoDevice::new(
            config.paths.demo_output.clone(),
            config.display.width,
            config.display.height,
        );
        Self::new(
            Box::new(device),
            config.display.width,
            config.display.height,
            config.paths.current_image.clone(),
            true,
        )
    }

    /// Open and initialise the panel, falling back to demo mode when it is
    /// not available.
    pub fn initialize(config: &Config) -> Self {
        match open_panel(config) {
            Ok(mut device) => match device.init().and_then(|_| device.clear()) {
                Ok(()) => {
                    info!(
                        "Display initialised: {} {}x{}",
                        device.name(),
                        config.display.width,
                        config.display.height
                    );
                    let manager = Self::new(
                        device,
                        config.display.width,
                        config.display.height,
                        config.paths.current_image.clone(),
                        false,
                    );
                    manager.lock().ready = true;
                    manager
                }
                Err(e) => {
                    warn!("Display init failed ({e}). Running in demo mode.");
                    Self::demo(config)
                }
            },
            Err(e) => {
                warn!("{e}. Running in demo mode.");
                Self::demo(config)
            }
        }
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True while a refresh holds the device.
    pub fn is_busy(&self) -> bool {
        matches!(self.slot.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Hold the device as an in-flight refresh would.
    #[cfg(test)]
    pub(crate) fn hold_for_test(&self) -> impl Sized + '_ {
        self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceSlot> {
        // A panic mid-refresh leaves the controller state unknown
        self.slot.lock().unwrap_or_else(|poisoned| {
            let mut slot = poisoned.into_inner();
            slot.ready = false;
            slot
        })
    }

    fn check_dimensions(&self, bitmap: &DisplayBitmap) -> Result<(), DisplayError> {
        if bitmap.dimensions() != (self.width, self.height) {
            return Err(DisplayError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: bitmap.width(),
                actual_height: bitmap.height(),
            });
        }
        Ok(())
    }

    /// Show a frame, waiting for any refresh in progress.
    pub fn display(&self, bitmap: &DisplayBitmap) -> Result<(), DisplayError> {
        self.check_dimensions(bitmap)?;
        let mut slot = self.lock();
        self.show(&mut slot, bitmap);
        Ok(())
    }

    /// Show a frame unless a refresh is already in progress.
    pub fn try_display(&self, bitmap: &DisplayBitmap) -> Result<(), DisplayError> {
        self.check_dimensions(bitmap)?;
        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::WouldBlock) => return Err(DisplayError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut slot = poisoned.into_inner();
                slot.ready = false;
                slot
            }
        };
        self.show(&mut slot, bitmap);
        Ok(())
    }

    /// Send a frame and record it as the current image. Device and
    /// persistence errors are logged; `current_image` only changes when the
    /// device accepted the frame.
    fn show(&self, slot: &mut DeviceSlot, bitmap: &DisplayBitmap) {
        let result = slot
            .ensure_ready()
            .and_then(|_| slot.device.display(bitmap));
        if let Err(e) = result {
            error!("Error displaying frame on {}: {}", slot.device.name(), e);
            slot.ready = false;
            return;
        }
        debug!("Frame sent to {} device", slot.device.name());

        if let Err(e) = bitmap.save(&self.current_image) {
            error!(
                "Could not save current frame to {}: {}",
                self.current_image.display(),
                e
            );
        }
    }

    /// Blank the panel. Errors are logged.
    pub fn clear(&self) {
        let mut slot = self.lock();
        if let Err(e) = slot.ensure_ready().and_then(|_| slot.device.clear()) {
            error!("Error clearing display: {e}");
            slot.ready = false;
        }
    }

    /// Put the panel into deep sleep. Errors are logged.
    pub fn sleep(&self) {
        let mut slot = self.lock();
        if !slot.ready {
            debug!("Display already asleep");
            return;
        }
        if let Err(e) = slot.device.sleep() {
            error!("Error putting display to sleep: {e}");
        }
        slot.ready = false;
    }
}

#[cfg(all(target_os = "linux", feature = "hardware"))]
fn open_panel(config: &Config) -> Result<Box<dyn EpdDevice>, DisplayError> {
    if !config.hardware.spi_device.exists() {
        return Err(DisplayError::HardwareUnavailable(format!(
            "{} not found",
            config.hardware.spi_device.display()
        )));
    }
    let device = crate::hardware::Epd2in13Device::open(
        &config.hardware,
        config.display.width,
        config.display.height,
    )?;
    Ok(Box::new(device))
}

#[cfg(not(all(target_os = "linux", feature = "hardware")))]
fn open_panel(_config: &Config) -> Result<Box<dyn EpdDevice>, DisplayError> {
    Err(DisplayError::HardwareUnavailable(
        "built without the `hardware` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records every call; fails `display` when asked to.
    struct RecordingDevice {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_display: bool,
    }

    impl EpdDevice for RecordingDevice {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn init(&mut self) -> Result<(), DisplayError> {
            self.calls.lock().unwrap().push("init");
            Ok(())
        }

        fn clear(&mut self) -> Result<(), DisplayError> {
            self.calls.lock().unwrap().push("clear");
            Ok(())
        }

        fn display(&mut self, _bitmap: &DisplayBitmap) -> Result<(), DisplayError> {
            self.calls.lock().unwrap().push("display");
            if self.fail_display {
                return Err(DisplayError::Device("SPI write failed".into()));
            }
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), DisplayError> {
            self.calls.lock().unwrap().push("sleep");
            Ok(())
        }
    }

    fn manager(
        dir: &tempfile::TempDir,
        fail_display: bool,
    ) -> (DisplayManager, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let device = RecordingDevice {
            calls: calls.clone(),
            fail_display,
        };
        let manager = DisplayManager::new(
            Box::new(device),
            250,
            122,
            dir.path().join("current.bmp"),
            false,
        );
        (manager, calls)
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_before_device() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(&dir, false);
        let err = manager.display(&DisplayBitmap::new(122, 250)).unwrap_err();
        assert!(matches!(
            err,
            DisplayError::DimensionMismatch {
                actual_width: 122,
                ..
            }
        ));
        assert!(calls.lock().unwrap().is_empty());
        assert!(!dir.path().join("current.bmp").exists());
    }

    #[test]
    fn test_display_initialises_once_and_persists_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(&dir, false);
        let mut bitmap = DisplayBitmap::new(250, 122);
        bitmap.set_pixel(3, 4, true);

        manager.display(&bitmap).unwrap();
        manager.display(&bitmap).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["init", "display", "display"]);

        let saved = DisplayBitmap::load(&dir.path().join("current.bmp")).unwrap();
        assert_eq!(saved, bitmap);
    }

    #[test]
    fn test_device_errors_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(&dir, true);
        let bitmap = DisplayBitmap::new(250, 122);
        assert!(manager.display(&bitmap).is_ok());
        // Failure forces a re-init on the next frame
        assert!(manager.display(&bitmap).is_ok());
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["init", "display", "init", "display"]
        );
        assert!(
            !dir.path().join("current.bmp").exists(),
            "A frame the panel rejected must not become the current image"
        );
    }

    #[test]
    fn test_failed_display_keeps_previous_current_image() {
        let dir = tempfile::tempdir().unwrap();
        let (working, _) = manager(&dir, false);
        let mut shown = DisplayBitmap::new(250, 122);
        shown.set_pixel(1, 1, true);
        working.display(&shown).unwrap();

        let (failing, _) = manager(&dir, true);
        failing.display(&DisplayBitmap::new(250, 122)).unwrap();
        assert_eq!(
            DisplayBitmap::load(&dir.path().join("current.bmp")).unwrap(),
            shown
        );
    }

    #[test]
    fn test_demo_display_survives_unwritable_current_image() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut config = Config::default();
        config.paths.demo_output = dir.path().join("demo.bmp");
        config.paths.current_image = blocker.join("current.bmp");
        let manager = DisplayManager::demo(&config);

        let bitmap = DisplayBitmap::new(250, 122);
        assert!(manager.display(&bitmap).is_ok());
        assert_eq!(
            DisplayBitmap::load(&config.paths.demo_output).unwrap(),
            bitmap
        );
    }

    #[test]
    fn test_try_display_reports_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(&dir, false);
        let bitmap = DisplayBitmap::new(250, 122);

        let guard = manager.slot.lock().unwrap();
        assert!(manager.is_busy());
        assert!(matches!(
            manager.try_display(&bitmap),
            Err(DisplayError::Busy)
        ));
        drop(guard);

        assert!(!manager.is_busy());
        manager.try_display(&bitmap).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["init", "display"]);
    }

    #[test]
    fn test_sleep_then_display_wakes_device() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, calls) = manager(&dir, false);
        let bitmap = DisplayBitmap::new(250, 122);

        manager.sleep();
        manager.display(&bitmap).unwrap();
        manager.sleep();
        manager.clear();
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["init", "display", "sleep", "init", "clear"]
        );
    }

    #[test]
    fn test_initialize_without_panel_falls_back_to_demo() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.hardware.spi_device = dir.path().join("no-such-spidev");
        config.paths.demo_output = dir.path().join("demo.bmp");
        config.paths.current_image = dir.path().join("current.bmp");

        let manager = DisplayManager::initialize(&config);
        assert!(manager.is_demo());
        assert_eq!(manager.dimensions(), (250, 122));

        let mut bitmap = DisplayBitmap::new(250, 122);
        bitmap.set_pixel(0, 0, true);
        manager.display(&bitmap).unwrap();
        assert_eq!(
            DisplayBitmap::load(&config.paths.demo_output).unwrap(),
            bitmap
        );
        assert!(config.paths.current_image.exists());
    }
}
