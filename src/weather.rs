//! # Open-Meteo Weather Client
//!
//! Fetches the current conditions for a city name in two requests:
//!
//! 1. **Geocode**: `GET {geocoding_url}?name=<city>&count=1` resolves the name
//!    to coordinates and a display label (`name, admin1, country`).
//! 2. **Forecast**: `GET {forecast_url}?latitude=..&longitude=..&current=..&daily=sunrise,sunset&timezone=auto`
//!    returns current temperature, humidity, wind and WMO weather code plus
//!    today's sunrise and sunset in the location's local time.
//!
//! The service needs no API key. Response parsing lives in the pure
//! [`parse_geocoding`] and [`parse_forecast`] functions so it can be tested
//! without the network.
//!
//! ## Error Handling
//!
//! Every failure surfaces as [`WeatherError`]. Callers render the offline
//! dashboard instead of propagating it to the panel.

use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, warn};
use reqwest::{header, Client};
use serde::Deserialize;
use thiserror::Error;

use crate::config::WeatherConfig;

/// Errors that can occur while fetching weather.
#[derive(Error, Debug)]
pub enum WeatherError {
    /// Network, timeout or non-2xx response
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Geocoding returned no match
    #[error("city not found: {0}")]
    CityNotFound(String),

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A geocoded place.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// `name, admin1, country` with empty parts skipped
    pub display_name: String,
}

/// Current conditions for one city. Never persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeatherSnapshot {
    pub city_display: String,
    pub temperature_c: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    /// WMO weather interpretation code
    pub weather_code: Option<u16>,
    /// Local time at the location
    pub sunrise: Option<NaiveDateTime>,
    pub sunset: Option<NaiveDateTime>,
}

impl WeatherSnapshot {
    /// Short description of the current condition, empty when unknown.
    pub fn condition(&self) -> &'static str {
        self.weather_code.map(weather_code_text).unwrap_or("")
    }
}

/// WMO weather code to a short label. Unknown codes map to an empty string.
pub fn weather_code_text(code: u16) -> &'static str {
    match code {
        0 => "Clear",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Rime fog",
        51 => "Light drizzle",
        53 => "Drizzle",
        55 => "Heavy drizzle",
        61 => "Light rain",
        63 => "Rain",
        65 => "Heavy rain",
        71 => "Light snow",
        73 => "Snow",
        75 => "Heavy snow",
        80 => "Rain showers",
        95 => "Thunder",
        _ => "",
    }
}

// -- Wire format --

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<GeocodingResult>>,
}

#[derive(Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    admin1: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<CurrentBlock>,
    #[serde(default)]
    daily: Option<DailyBlock>,
}

#[derive(Deserialize)]
struct CurrentBlock {
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    weather_code: Option<f64>,
}

#[derive(Deserialize)]
struct DailyBlock {
    #[serde(default)]
    sunrise: Vec<Option<String>>,
    #[serde(default)]
    sunset: Vec<Option<String>>,
}

/// Parse a geocoding search response. `query` is used as the display name
/// when the match has no name of its own.
pub fn parse_geocoding(body: &str, query: &str) -> Result<Location, WeatherError> {
    let response: GeocodingResponse =
        serde_json::from_str(body).map_err(|e| WeatherError::MalformedResponse(e.to_string()))?;
    let first = response
        .results
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| WeatherError::CityNotFound(query.to_string()))?;

    let name = first
        .name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| query.to_string());
    let display_name = [Some(name), first.admin1, first.country]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    Ok(Location {
        latitude: first.latitude,
        longitude: first.longitude,
        display_name,
    })
}

/// Parse a forecast response into a snapshot for `city_display`.
pub fn parse_forecast(body: &str, city_display: &str) -> Result<WeatherSnapshot, WeatherError> {
    let response: ForecastResponse =
        serde_json::from_str(body).map_err(|e| WeatherError::MalformedResponse(e.to_string()))?;

    let mut snapshot = WeatherSnapshot {
        city_display: city_display.to_string(),
        ..WeatherSnapshot::default()
    };

    if let Some(current) = response.current {
        snapshot.temperature_c = current.temperature_2m;
        snapshot.humidity = current.relative_humidity_2m;
        snapshot.wind_speed_kmh = current.wind_speed_10m;
        snapshot.weather_code = current
            .weather_code
            .filter(|c| (0.0..=f64::from(u16::MAX)).contains(c))
            .map(|c| c as u16);
    }
    if let Some(daily) = response.daily {
        snapshot.sunrise = first_time(&daily.sunrise);
        snapshot.sunset = first_time(&daily.sunset);
    }

    Ok(snapshot)
}

/// First entry of a daily time series as a local timestamp.
fn first_time(series: &[Option<String>]) -> Option<NaiveDateTime> {
    let raw = series.first()?.as_deref()?;
    let parsed = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"));
    match parsed {
        Ok(time) => Some(time),
        Err(e) => {
            warn!("Ignoring unparseable time {raw:?}: {e}");
            None
        }
    }
}

/// Async Open-Meteo client.
pub struct WeatherClient {
    client: Client,
    geocoding_url: String,
    forecast_url: String,
}

impl WeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self, WeatherError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            geocoding_url: config.geocoding_url.clone(),
            forecast_url: config.forecast_url.clone(),
        })
    }

    /// Resolve a city name to coordinates.
    pub async fn geocode(&self, city: &str) -> Result<Location, WeatherError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(WeatherError::CityNotFound(String::new()));
        }
        let body = self
            .client
            .get(&self.geocoding_url)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let location = parse_geocoding(&body, city)?;
        debug!(
            "Geocoded {city:?} to {} ({:.4}, {:.4})",
            location.display_name, location.latitude, location.longitude
        );
        Ok(location)
    }

    /// Current conditions at a location.
    pub async fn forecast(&self, location: &Location) -> Result<WeatherSnapshot, WeatherError> {
        let latitude = location.latitude.to_string();
        let longitude = location.longitude.to_string();
        let body = self
            .client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                (
                    "current",
                    "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code",
                ),
                ("daily", "sunrise,sunset"),
                ("timezone", "auto"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_forecast(&body, &location.display_name)
    }

    /// Geocode then fetch the forecast.
    pub async fn fetch(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
        let location = self.geocode(city).await?;
        self.forecast(&location).await
    }
}
