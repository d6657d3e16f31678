//! # Weather Dashboard Renderer
//!
//! Lays out the current weather as a 1-bit frame.
//!
//! ## Layout (landscape, 250×122)
//! ```text
//!  ┌──────────────────────────────────────────┐
//!  │ 3:45 PM                                  │  clock
//!  │ Sun Jun 16          San Francisco, Ca... │  date + city
//!  │──────────────────────────────────────────│  divider
//!  │ ▇▇°C                          Hum 71%    │  temperature | details
//!  │ ▇▇                         Wind 22 km/h  │
//!  │                              Rise 05:47  │
//!  │ Overcast                      Set 20:34  │  condition
//!  └──────────────────────────────────────────┘
//! ```
//!
//! A portrait canvas (after a 90° or 270° rotation) stacks the details under
//! the temperature instead. The layout is drawn on the pre-rotation canvas
//! and the rotation and flips are applied afterwards, so the result always
//! has the panel dimensions.
//!
//! ## Overflow
//! Every text run is cut to its region with a trailing `...` and lines that
//! would cross the bottom edge are dropped. Fonts are fixed-width, so widths
//! are exact.
//!
//! ## Offline
//! When no weather is available the same frame carries an inverted
//! `WEATHER OFFLINE` banner, a `--` temperature and the reason.

use core::convert::Infallible;

use chrono::NaiveDateTime;
use embedded_graphics::{
    mono_font::{
        iso_8859_1::{FONT_10X20, FONT_6X10, FONT_7X13},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};

use crate::bitmap::{DisplayBitmap, Orientation};
use crate::settings::{Settings, Units};
use crate::weather::WeatherSnapshot;

const MARGIN: i32 = 8;
const HEADER_Y: i32 = 4;
const SUBHEADER_Y: i32 = 30;
const DIVIDER_Y: i32 = 48;
const LEFT_X: i32 = 10;
const RIGHT_MARGIN: i32 = 10;
const LEFT_COL_MAX_W: i32 = 130;
/// Widest the enlarged temperature may be before falling back to 1×
const TEMP_BUDGET_W: u32 = 120;
const LINE_GAP: i32 = 2;

const CLOCK_FONT: &MonoFont = &FONT_10X20;
const BODY_FONT: &MonoFont = &FONT_7X13;
const SMALL_FONT: &MonoFont = &FONT_6X10;
const TEMP_FONT: &MonoFont = &FONT_10X20;

const ELLIPSIS: &str = "...";

/// What the dashboard shows.
#[derive(Clone, Debug)]
pub enum DashboardData<'a> {
    Live(&'a WeatherSnapshot),
    /// No weather; carries the reason shown on the frame
    Unavailable(String),
}

/// Presentation options taken from the user settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DashboardOptions {
    pub show_humidity: bool,
    pub show_wind: bool,
    pub show_sun: bool,
    pub units: Units,
    pub orientation: Orientation,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Settings::default().dashboard_options()
    }
}

impl Settings {
    /// Dashboard options implied by these settings.
    pub fn dashboard_options(&self) -> DashboardOptions {
        DashboardOptions {
            show_humidity: self.show_humidity,
            show_wind: self.show_wind,
            show_sun: self.show_sun,
            units: self.units,
            orientation: self.orientation(),
        }
    }
}

/// Width in pixels of `text` set in a fixed-width `font`.
pub fn text_width(text: &str, font: &MonoFont) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    n * font.character_size.width + (n - 1) * font.character_spacing
}

/// Cut `text` so it fits in `max_width`, marking the cut with `...`.
pub fn ellipsize(text: &str, max_width: u32, font: &MonoFont) -> String {
    if text_width(text, font) <= max_width {
        return text.to_string();
    }
    if text_width(ELLIPSIS, font) > max_width {
        return String::new();
    }
    let mut kept: String = text.chars().collect();
    while !kept.is_empty() {
        kept.pop();
        let candidate = format!("{}{ELLIPSIS}", kept.trim_end());
        if text_width(&candidate, font) <= max_width {
            return candidate;
        }
    }
    ELLIPSIS.to_string()
}

/// Greedy word wrap to lines of at most `max_chars` characters. Words longer
/// than a line are left for [`ellipsize`] to cut.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > max_chars {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Temperature in the requested units, `--` when unknown.
pub fn format_temperature(celsius: Option<f64>, units: Units) -> String {
    match celsius {
        Some(c) if c.is_finite() => {
            // + 0.0 turns -0 into 0
            let value = units.from_celsius(c).round() + 0.0;
            format!("{value:.0}°{}", units.suffix())
        }
        _ => "--".to_string(),
    }
}

/// Detail lines for the enabled fields that have a value.
pub fn detail_lines(snapshot: &WeatherSnapshot, options: &DashboardOptions) -> Vec<String> {
    let mut lines = Vec::new();
    if options.show_humidity {
        if let Some(h) = snapshot.humidity {
            lines.push(format!("Hum {h:.0}%"));
        }
    }
    if options.show_wind {
        if let Some(w) = snapshot.wind_speed_kmh {
            lines.push(format!("Wind {w:.0} km/h"));
        }
    }
    if options.show_sun {
        if let Some(rise) = snapshot.sunrise {
            lines.push(format!("Rise {}", rise.format("%H:%M")));
        }
        if let Some(set) = snapshot.sunset {
            lines.push(format!("Set {}", set.format("%H:%M")));
        }
    }
    lines
}

fn draw_text<S>(display: &mut S, text: &str, x: i32, y: i32, font: &MonoFont, color: BinaryColor)
where
    S: DrawTarget<Color = BinaryColor, Error = Infallible>,
{
    if text.is_empty() {
        return;
    }
    Text::with_baseline(text, Point::new(x, y), MonoTextStyle::new(font, color), Baseline::Top)
        .draw(display)
        .ok();
}

/// Draw `text` enlarged by an integer `factor`, pixel-doubling the glyphs.
fn draw_text_scaled<S>(display: &mut S, text: &str, x: i32, y: i32, font: &MonoFont, factor: u32)
where
    S: DrawTarget<Color = BinaryColor, Error = Infallible>,
{
    let width = text_width(text, font);
    if width == 0 {
        return;
    }
    let mut glyphs = DisplayBitmap::new(width, font.character_size.height);
    draw_text(&mut glyphs, text, 0, 0, font, BinaryColor::On);

    let f = factor as i32;
    let pixels = (0..glyphs.height())
        .flat_map(|gy| (0..glyphs.width()).map(move |gx| (gx, gy)))
        .filter(|&(gx, gy)| glyphs.is_black(gx, gy))
        .flat_map(|(gx, gy)| {
            let ox = x + gx as i32 * f;
            let oy = y + gy as i32 * f;
            (0..f).flat_map(move |dy| {
                (0..f).map(move |dx| Pixel(Point::new(ox + dx, oy + dy), BinaryColor::On))
            })
        });
    display.draw_iter(pixels).ok();
}

/// Lays out dashboards for one panel size.
#[derive(Clone, Copy, Debug)]
pub struct DashboardRenderer {
    width: u32,
    height: u32,
}

/// Regions computed for one canvas.
struct Frame {
    width: i32,
    height: i32,
    landscape: bool,
}

impl DashboardRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Render a dashboard frame with exactly the panel dimensions.
    pub fn render(
        &self,
        data: &DashboardData<'_>,
        options: &DashboardOptions,
        now: NaiveDateTime,
    ) -> DisplayBitmap {
        let (canvas_w, canvas_h) = options
            .orientation
            .source_dimensions(self.width, self.height);
        let mut canvas = DisplayBitmap::new(canvas_w, canvas_h);
        self.draw(&mut canvas, data, options, now);
        canvas.oriented(&options.orientation)
    }

    /// Draw the unrotated layout onto any 1-bit target.
    pub fn draw<S>(
        &self,
        display: &mut S,
        data: &DashboardData<'_>,
        options: &DashboardOptions,
        now: NaiveDateTime,
    ) where
        S: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        let size = display.bounding_box().size;
        let frame = Frame {
            width: size.width as i32,
            height: size.height as i32,
            landscape: size.width >= size.height,
        };

        let (city, temperature, condition, details) = match data {
            DashboardData::Live(snapshot) => (
                snapshot.city_display.clone(),
                format_temperature(snapshot.temperature_c, options.units),
                snapshot.condition().to_string(),
                detail_lines(snapshot, options),
            ),
            DashboardData::Unavailable(reason) => {
                let chars_per_line = (self.detail_width(&frame).max(0) as u32
                    / (BODY_FONT.character_size.width + BODY_FONT.character_spacing))
                    .max(1) as usize;
                (
                    String::new(),
                    "--".to_string(),
                    "No data".to_string(),
                    wrap(reason, chars_per_line),
                )
            }
        };

        self.draw_header(display, &frame, now, &city);
        if matches!(data, DashboardData::Unavailable(_)) {
            self.draw_offline_banner(display, &frame);
        }
        self.draw_body(display, &frame, &temperature, &condition, &details);
    }

    fn draw_header<S>(&self, display: &mut S, frame: &Frame, now: NaiveDateTime, city: &str)
    where
        S: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        let inner_w = (frame.width - 2 * MARGIN).max(0) as u32;

        let clock = now.format("%-I:%M %p").to_string();
        let clock = ellipsize(&clock, inner_w, CLOCK_FONT);
        draw_text(display, &clock, MARGIN, HEADER_Y, CLOCK_FONT, BinaryColor::On);

        let date = now.format("%a %b %d").to_string();
        let date = ellipsize(&date, (frame.width - LEFT_X - MARGIN).max(0) as u32, BODY_FONT);
        draw_text(display, &date, LEFT_X, SUBHEADER_Y, BODY_FONT, BinaryColor::On);

        let divider_y = self.divider_y(frame);
        if frame.landscape {
            // City shares the subheader row, right aligned
            let date_end = LEFT_X + text_width(&date, BODY_FONT) as i32 + 8;
            let avail = (frame.width - MARGIN - date_end).max(0) as u32;
            let city = ellipsize(city, avail, BODY_FONT);
            let x = frame.width - MARGIN - text_width(&city, BODY_FONT) as i32;
            draw_text(display, &city, x, SUBHEADER_Y, BODY_FONT, BinaryColor::On);
        } else {
            let y = SUBHEADER_Y + BODY_FONT.character_size.height as i32 + LINE_GAP;
            let city = ellipsize(city, inner_w, BODY_FONT);
            draw_text(display, &city, LEFT_X, y, BODY_FONT, BinaryColor::On);
        }

        Line::new(
            Point::new(MARGIN, divider_y),
            Point::new(frame.width - MARGIN - 1, divider_y),
        )
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(display)
        .ok();
    }

    fn draw_offline_banner<S>(&self, display: &mut S, frame: &Frame)
    where
        S: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        let banner_h = BODY_FONT.character_size.height + 4;
        let top = self.divider_y(frame) - banner_h as i32 - 1;
        Rectangle::new(Point::new(0, top), Size::new(frame.width as u32, banner_h))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(display)
            .ok();

        let label = ellipsize(
            "WEATHER OFFLINE",
            (frame.width - 2 * MARGIN).max(0) as u32,
            BODY_FONT,
        );
        let x = (frame.width - text_width(&label, BODY_FONT) as i32) / 2;
        draw_text(display, &label, x, top + 2, BODY_FONT, BinaryColor::Off);
    }

    fn draw_body<S>(
        &self,
        display: &mut S,
        frame: &Frame,
        temperature: &str,
        condition: &str,
        details: &[String],
    ) where
        S: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        let body_top = self.divider_y(frame) + 6;
        let left_col_w = self.left_column_width(frame);
        let condition_h = SMALL_FONT.character_size.height as i32;
        let line_h = BODY_FONT.character_size.height as i32 + LINE_GAP;

        // Landscape keeps the condition on the bottom row; portrait puts it
        // straight under the temperature.
        let bottom_condition_y = frame.height - condition_h - 4;
        let large_h = TEMP_FONT.character_size.height as i32 * 2;
        let large_w = text_width(temperature, TEMP_FONT) * 2;
        let large_fits_below = if frame.landscape {
            body_top + large_h + LINE_GAP <= bottom_condition_y
        } else {
            body_top + large_h <= frame.height
        };
        let temp_h = if large_w <= TEMP_BUDGET_W.min(left_col_w) && large_fits_below {
            draw_text_scaled(display, temperature, LEFT_X, body_top, TEMP_FONT, 2);
            large_h
        } else {
            let temp = ellipsize(temperature, left_col_w, TEMP_FONT);
            draw_text(display, &temp, LEFT_X, body_top, TEMP_FONT, BinaryColor::On);
            TEMP_FONT.character_size.height as i32
        };

        let condition_y = if frame.landscape {
            bottom_condition_y
        } else {
            body_top + temp_h + LINE_GAP
        };
        if condition_y + condition_h <= frame.height {
            let condition = ellipsize(condition, left_col_w, SMALL_FONT);
            draw_text(display, &condition, LEFT_X, condition_y, SMALL_FONT, BinaryColor::On);
        }

        let detail_w = self.detail_width(frame).max(0) as u32;
        let mut y = if frame.landscape {
            body_top
        } else {
            condition_y + condition_h + LINE_GAP + 2
        };
        for line in details {
            if y + BODY_FONT.character_size.height as i32 > frame.height {
                break;
            }
            let text = ellipsize(line, detail_w, BODY_FONT);
            let x = if frame.landscape {
                frame.width - RIGHT_MARGIN - text_width(&text, BODY_FONT) as i32
            } else {
                LEFT_X
            };
            draw_text(display, &text, x, y, BODY_FONT, BinaryColor::On);
            y += line_h;
        }
    }

    fn divider_y(&self, frame: &Frame) -> i32 {
        if frame.landscape {
            DIVIDER_Y
        } else {
            // City moves to its own row
            DIVIDER_Y + BODY_FONT.character_size.height as i32 + LINE_GAP
        }
    }

    fn left_column_width(&self, frame: &Frame) -> u32 {
        let available = (frame.width - LEFT_X - MARGIN).max(0);
        if frame.landscape {
            available.min(LEFT_COL_MAX_W) as u32
        } else {
            available as u32
        }
    }

    fn detail_width(&self, frame: &Frame) -> i32 {
        if frame.landscape {
            let min_x = LEFT_X + LEFT_COL_MAX_W + 6;
            (frame.width - RIGHT_MARGIN - min_x).max(10)
        } else {
            frame.width - LEFT_X - MARGIN
        }
    }
}
