//! # End-to-End Frame Properties
//!
//! These tests check the guarantees the whole pipeline makes, independent of
//! any one module: every accepted input produces a frame of exactly the panel
//! size, orientation changes are lossless, and rejected input never reaches
//! the panel or the persisted state.

use std::fs;

use chrono::NaiveDate;
use image::{GrayImage, Luma};
use serde_json::json;

use crate::bitmap::{DisplayBitmap, Orientation, Rotation};
use crate::config::Config;
use crate::dashboard::{DashboardData, DashboardOptions, DashboardRenderer};
use crate::geometry::{CropSpec, GeometryError, Pipeline};
use crate::settings::{Settings, SettingsError, SettingsStore};
use crate::weather::WeatherSnapshot;

const ROTATIONS: [Rotation; 4] = [
    Rotation::Deg0,
    Rotation::Deg90,
    Rotation::Deg180,
    Rotation::Deg270,
];

fn checkerboard(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if (x / 7 + y / 5) % 2 == 0 {
            Luma([20])
        } else {
            Luma([235])
        }
    })
}

/// Test that every in-bounds crop yields a frame with the panel dimensions.
///
/// Sweeps scale, crop position and orientation, including crops much smaller
/// and much larger than the panel and extreme aspect ratios.
#[test]
fn in_bounds_crops_always_fill_the_panel() {
    let pipeline = Pipeline::new(&Config::default().display);
    let source = checkerboard(320, 200);

    let crops = [
        CropSpec::full(320, 200),
        CropSpec { scale: 0.1, x: 0, y: 0, width: 32, height: 20 },
        CropSpec { scale: 3.0, x: 100, y: 50, width: 800, height: 10 },
        CropSpec { scale: 1.0, x: 319, y: 0, width: 1, height: 200 },
        CropSpec { scale: 2.5, x: 0, y: 0, width: 1, height: 1 },
    ];

    for crop in crops {
        for rotation in ROTATIONS {
            let orientation = Orientation { rotation, flip_h: false, flip_v: true };
            let (_, bitmap) = pipeline
                .process(&source, &crop, &orientation)
                .unwrap_or_else(|e| panic!("{crop:?} rejected: {e}"));
            assert_eq!(
                bitmap.dimensions(),
                (250, 122),
                "{crop:?} at {}° produced the wrong size",
                rotation.degrees()
            );
        }
    }
}

/// Test that four successive quarter turns give back the same frame.
#[test]
fn four_quarter_turns_are_lossless() {
    let pipeline = Pipeline::new(&Config::default().display);
    let (_, bitmap) = pipeline
        .process(&checkerboard(250, 122), &CropSpec::full(250, 122), &Orientation::default())
        .unwrap();

    let turned = (0..4).fold(bitmap.clone(), |frame, _| frame.rotated(Rotation::Deg90));
    assert_eq!(turned, bitmap, "Four 90° rotations should be the identity");
}

/// Test that crops outside the scaled image are rejected and never clamped.
#[test]
fn out_of_bounds_crops_are_rejected() {
    let source = checkerboard(300, 300);
    let pipeline = Pipeline::new(&Config::default().display);

    let bad = [
        CropSpec { scale: 1.0, x: 250, y: 0, width: 100, height: 100 },
        CropSpec { scale: 1.0, x: 0, y: 299, width: 10, height: 2 },
        CropSpec { scale: 0.5, x: 0, y: 0, width: 151, height: 150 },
        CropSpec { scale: 1.0, x: 1000, y: 1000, width: 5, height: 5 },
    ];
    for crop in bad {
        match pipeline.process(&source, &crop, &Orientation::default()) {
            Err(GeometryError::InvalidCrop { .. }) => {}
            other => panic!("{crop:?} should be InvalidCrop, got {other:?}"),
        }
    }
}

/// Test that an identity crop is exactly the direct 1-bit conversion.
#[test]
fn identity_crop_equals_direct_conversion() {
    let config = Config::default();
    let pipeline = Pipeline::new(&config.display);
    let source = checkerboard(250, 122);

    let (_, bitmap) = pipeline
        .process(&source, &CropSpec::full(250, 122), &Orientation::default())
        .unwrap();
    let direct = DisplayBitmap::from_luma(&source, config.display.dither, config.display.threshold);
    assert_eq!(bitmap, direct);
}

/// Test that a dashboard with every optional field disabled still renders
/// the temperature at the right size.
#[test]
fn minimal_dashboard_still_shows_temperature() {
    let renderer = DashboardRenderer::new(250, 122);
    let snapshot = WeatherSnapshot {
        city_display: "Reykjavik, Capital Region, Iceland".into(),
        temperature_c: Some(-7.0),
        ..WeatherSnapshot::default()
    };
    let now = NaiveDate::from_ymd_opt(2024, 1, 5)
        .unwrap()
        .and_hms_opt(8, 5, 0)
        .unwrap();

    for rotation in ROTATIONS {
        let options = DashboardOptions {
            show_humidity: false,
            show_wind: false,
            show_sun: false,
            orientation: Orientation { rotation, ..Orientation::default() },
            ..DashboardOptions::default()
        };
        let frame = renderer.render(&DashboardData::Live(&snapshot), &options, now);
        assert_eq!(frame.dimensions(), (250, 122));

        let with_temp = frame.black_pixel_count();
        let without = renderer
            .render(
                &DashboardData::Live(&WeatherSnapshot { temperature_c: None, ..snapshot.clone() }),
                &options,
                now,
            )
            .black_pixel_count();
        assert!(
            with_temp > without,
            "Temperature should add ink at {}° ({with_temp} vs {without})",
            rotation.degrees()
        );
    }
}

/// Test that settings survive a save/load cycle and that an invalid rotation
/// leaves the stored file byte-for-byte untouched.
#[test]
fn settings_roundtrip_and_rejected_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));

    let settings = Settings {
        city: "Wellington".into(),
        rotation: Rotation::Deg270,
        flip_v: true,
        ..Settings::default()
    };
    store.save(&settings).unwrap();
    assert_eq!(store.load().unwrap(), settings);

    let before = fs::read(store.path()).unwrap();
    let err = store.update(&json!({ "rotation": 45 })).unwrap_err();
    assert!(matches!(err, SettingsError::Validation(_)), "got {err:?}");
    assert_eq!(fs::read(store.path()).unwrap(), before);
}
