//! # ePaper Frame Entry Point
//!
//! Command-line front-end for the frame service. Every subcommand maps to one
//! operation: show a photo, draw the weather dashboard, rotate, change
//! settings, or keep the dashboard updating until interrupted.
//!
//! `--stdout` is the development mode: the panel is never opened and the
//! resulting frame is printed as text instead.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use epaper_frame_lib::{
    config::Config,
    display::DisplayManager,
    frame::Frame,
    geometry::{self, CropSpec},
    logging, DisplayBitmap, Settings,
};

#[derive(Parser, Debug)]
#[command(name = "epaper-frame", version, about = "Photo frame and weather dashboard for a 2.13\" e-paper panel")]
struct Cli {
    /// Configuration file (default: epaper-config.toml or $EPAPER_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print frames as text instead of driving the panel
    #[arg(long, global = true)]
    stdout: bool,

    /// Log filter, e.g. `debug` (RUST_LOG still wins)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a photo and show it
    Upload(CropArgs),
    /// Process a photo into the resize preview without showing it
    Preview(CropArgs),
    /// Fetch the weather and show the dashboard
    Dashboard,
    /// Show the last photo again with the current rotation and flips
    Refresh,
    /// Turn the display by a multiple of 90 degrees and redraw
    Rotate {
        #[arg(allow_hyphen_values = true)]
        degrees: i32,
    },
    /// Blank the panel
    Clear,
    /// Put the panel into deep sleep
    Sleep,
    /// Show or change user settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Redraw the dashboard every `interval` seconds until Ctrl-C, while
    /// `auto_update` is on
    Auto {
        /// Turn `auto_update` on first
        #[arg(long)]
        enable: bool,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the current settings as JSON
    Show,
    /// Update settings, e.g. `set mode=dashboard city="New York" rotation=180`
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct CropArgs {
    /// JPEG, PNG, GIF or BMP file
    image: PathBuf,
    /// Scale factor applied before cropping (0.1 to 10)
    #[arg(long, default_value_t = 1.0)]
    scale: f32,
    /// Crop origin in scaled pixels
    #[arg(long, default_value_t = 0)]
    x: u32,
    #[arg(long, default_value_t = 0)]
    y: u32,
    /// Crop size in scaled pixels (default: the rest of the scaled image)
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
}

impl CropArgs {
    /// Resolve the crop, defaulting the size to everything right of and
    /// below the origin.
    fn crop_spec(&self) -> anyhow::Result<CropSpec> {
        let (source_w, source_h) = image::image_dimensions(&self.image)
            .with_context(|| format!("reading {}", self.image.display()))?;
        let (scaled_w, scaled_h) = geometry::scaled_dimensions(source_w, source_h, self.scale);
        Ok(CropSpec {
            scale: self.scale,
            x: self.x,
            y: self.y,
            width: self.width.unwrap_or(scaled_w.saturating_sub(self.x)),
            height: self.height.unwrap_or(scaled_h.saturating_sub(self.y)),
        })
    }

    fn read(&self) -> anyhow::Result<(Vec<u8>, CropSpec)> {
        let bytes = std::fs::read(&self.image)
            .with_context(|| format!("reading {}", self.image.display()))?;
        Ok((bytes, self.crop_spec()?))
    }
}

fn load_config(cli: &Cli) -> Config {
    match &cli.config {
        Some(path) => {
            let mut config = Config::load_from_path(path);
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load(),
    }
}

fn show(cli: &Cli, bitmap: &DisplayBitmap) {
    if cli.stdout {
        print!("{}", bitmap.to_ascii());
    }
}

fn print_settings(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli);
    logging::init(&config.logging, cli.log_level.as_deref());

    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    // Development mode never opens the panel
    let display = if cli.stdout {
        DisplayManager::demo(&config)
    } else {
        DisplayManager::initialize(&config)
    };
    if display.is_demo() && !cli.stdout {
        warn!(
            "No panel attached, frames go to {}",
            config.paths.demo_output.display()
        );
    }

    let frame = Frame::new(config, display)?;

    // Create Tokio runtime for the weather client and the auto loop
    let rt = tokio::runtime::Runtime::new()?;

    match &cli.command {
        Command::Upload(args) => {
            let (bytes, crop) = args.read()?;
            let bitmap = frame.upload(&bytes, &crop)?;
            show(&cli, &bitmap);
            info!("Displayed {}", args.image.display());
        }
        Command::Preview(args) => {
            let (bytes, crop) = args.read()?;
            let bitmap = frame.preview(&bytes, &crop)?;
            show(&cli, &bitmap);
            info!(
                "Preview written to {}",
                frame.config().paths.resize_preview.display()
            );
        }
        Command::Dashboard => {
            let bitmap = rt.block_on(frame.render_dashboard())?;
            show(&cli, &bitmap);
        }
        Command::Refresh => {
            let bitmap = frame.refresh()?;
            show(&cli, &bitmap);
        }
        Command::Rotate { degrees } => {
            let settings = rt.block_on(frame.rotate(*degrees))?;
            println!("rotation: {}", settings.rotation.degrees());
        }
        Command::Clear => frame.clear(),
        Command::Sleep => frame.sleep(),
        Command::Settings { action } => match action {
            SettingsAction::Show => print_settings(&frame.settings())?,
            SettingsAction::Set { pairs } => {
                let patch = Settings::patch_from_pairs(pairs)?;
                let settings = rt.block_on(frame.update_settings(&patch))?;
                print_settings(&settings)?;
            }
        },
        Command::Auto { enable } => {
            if *enable {
                let patch = serde_json::json!({ "auto_update": true });
                rt.block_on(frame.update_settings(&patch))?;
            } else if !frame.settings().auto_update {
                warn!("auto_update is off, nothing is redrawn until `settings set auto_update=true`");
            }
            rt.block_on(frame.run_auto(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Cannot listen for Ctrl-C: {e}");
                    std::future::pending::<()>().await;
                }
            }));
            frame.sleep();
        }
        // Printed before the display was opened
        Command::Config => {}
    }

    Ok(())
}
