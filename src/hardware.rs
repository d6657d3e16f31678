//! Waveshare 2.13" panel over Linux spidev and GPIO character devices.
//!
//! The controller's native frame is portrait (122×250). Landscape frames are
//! turned a quarter turn clockwise before they are sent, so the top of the
//! logical frame ends up along the panel's connector-side edge.

use epd_waveshare::{
    epd2in13_v2::{Epd2in13, HEIGHT, WIDTH},
    prelude::*,
};
use linux_embedded_hal::{
    gpio_cdev::{Chip, LineRequestFlags},
    spidev::{SpiModeFlags, SpidevOptions},
    CdevPin, Delay, SpidevDevice,
};
use log::{debug, info};

use crate::bitmap::{DisplayBitmap, Rotation};
use crate::config::HardwareConfig;
use crate::display::{DisplayError, EpdDevice};

type Panel = Epd2in13<SpidevDevice, CdevPin, CdevPin, CdevPin, Delay>;

fn unavailable<E: std::fmt::Debug>(what: &'static str) -> impl FnOnce(E) -> DisplayError {
    move |e| DisplayError::HardwareUnavailable(format!("{what}: {e:?}"))
}

fn device<E: std::fmt::Debug>(what: &'static str) -> impl FnOnce(E) -> DisplayError {
    move |e| DisplayError::Device(format!("{what}: {e:?}"))
}

/// The 2.13" V2/V3/V4 black and white panel.
pub struct Epd2in13Device {
    spi: SpidevDevice,
    epd: Panel,
    delay: Delay,
    logical: (u32, u32),
}

impl Epd2in13Device {
    /// Open SPI and GPIO lines and run the controller's power-on sequence.
    /// `width`×`height` is the logical frame size the rest of the crate uses.
    pub fn open(config: &HardwareConfig, width: u32, height: u32) -> Result<Self, DisplayError> {
        let native = (WIDTH, HEIGHT);
        if (width, height) != native && (height, width) != native {
            return Err(DisplayError::HardwareUnavailable(format!(
                "panel is {WIDTH}x{HEIGHT}, configured for {width}x{height}"
            )));
        }

        let mut spi = SpidevDevice::open(&config.spi_device)
            .map_err(unavailable("opening SPI device"))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(config.spi_speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)
            .map_err(unavailable("configuring SPI"))?;

        let mut chip = Chip::new(&config.gpio_chip).map_err(unavailable("opening GPIO chip"))?;
        let mut line = |pin: u32, flags: LineRequestFlags, label: &str| {
            chip.get_line(pin)
                .and_then(|line| line.request(flags, 0, label))
                .and_then(CdevPin::new)
                .map_err(|e| {
                    DisplayError::HardwareUnavailable(format!("requesting GPIO {pin}: {e:?}"))
                })
        };
        let busy = line(config.busy_pin, LineRequestFlags::INPUT, "epaper-busy")?;
        let dc = line(config.dc_pin, LineRequestFlags::OUTPUT, "epaper-dc")?;
        let rst = line(config.rst_pin, LineRequestFlags::OUTPUT, "epaper-rst")?;

        let mut delay = Delay;
        let epd = Epd2in13::new(&mut spi, busy, dc, rst, &mut delay, None)
            .map_err(unavailable("initialising panel"))?;
        info!(
            "Opened 2.13\" panel on {} (DC={}, RST={}, BUSY={})",
            config.spi_device.display(),
            config.dc_pin,
            config.rst_pin,
            config.busy_pin
        );

        Ok(Self {
            spi,
            epd,
            delay,
            logical: (width, height),
        })
    }

    /// Lay a logical frame out in the controller's native orientation.
    fn native_buffer(&self, bitmap: &DisplayBitmap) -> Result<Vec<u8>, DisplayError> {
        match bitmap.dimensions() {
            (WIDTH, HEIGHT) => Ok(bitmap.as_bytes().to_vec()),
            (HEIGHT, WIDTH) => Ok(bitmap.rotated(Rotation::Deg270).as_bytes().to_vec()),
            (w, h) => Err(DisplayError::DimensionMismatch {
                expected_width: self.logical.0,
                expected_height: self.logical.1,
                actual_width: w,
                actual_height: h,
            }),
        }
    }
}

impl EpdDevice for Epd2in13Device {
    fn name(&self) -> &'static str {
        "epd2in13"
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        self.epd
            .wake_up(&mut self.spi, &mut self.delay)
            .map_err(device("wake up"))
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.epd
            .clear_frame(&mut self.spi, &mut self.delay)
            .map_err(device("clear frame"))?;
        self.epd
            .display_frame(&mut self.spi, &mut self.delay)
            .map_err(device("display frame"))
    }

    fn display(&mut self, bitmap: &DisplayBitmap) -> Result<(), DisplayError> {
        let buffer = self.native_buffer(bitmap)?;
        debug!("Sending {} byte frame", buffer.len());
        self.epd
            .update_and_display_frame(&mut self.spi, &buffer, &mut self.delay)
            .map_err(device("update frame"))
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        self.epd
            .sleep(&mut self.spi, &mut self.delay)
            .map_err(device("sleep"))
    }
}
