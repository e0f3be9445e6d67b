//! OpenWeatherMap 5-day / 3-hour forecast provider (secondary).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::helpers::{format_utc_offset, ms_to_kmh, opt_ms_to_kmh, round_1dp};
use crate::services::provider::{ProviderError, WeatherProvider};
use crate::services::weather::{infer_precipitation_type, WeatherRecord};

pub const OPENWEATHER_API_URL: &str = "https://api.openweathermap.org/data/2.5/forecast";

pub const OPENWEATHER_PROVIDER_NAME: &str = "openweathermap";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

// --- OpenWeatherMap JSON response types ---

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: Option<OwCity>,
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    /// Shift in seconds from UTC
    timezone: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    wind: Option<OwWind>,
    clouds: Option<OwClouds>,
    pop: Option<f64>,
    rain: Option<OwVolume>,
    snow: Option<OwVolume>,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
    icon: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    deg: Option<f64>,
    gust: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwClouds {
    all: f64,
}

#[derive(Debug, Deserialize)]
struct OwVolume {
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

impl OpenWeatherProvider {
    /// Without an API key the provider reports itself unavailable.
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        api_key: &str,
    ) -> Result<OwForecastResponse, ProviderError> {
        let res = self
            .client
            .get(&self.base_url)
            .query(&[
                ("lat", format!("{:.4}", lat)),
                ("lon", format!("{:.4}", lon)),
                ("appid", api_key.to_string()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                // reqwest includes the URL in errors; keep the key out of logs
                ProviderError::Transport(format!(
                    "OpenWeatherMap request failed: {}",
                    e.without_url()
                ))
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            ProviderError::Data(format!(
                "Failed to read OpenWeatherMap response body: {}",
                e.without_url()
            ))
        })?;

        if !status.is_success() {
            return Err(ProviderError::http(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Data(format!("OpenWeatherMap JSON parse error: {}", e)))
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn name(&self) -> &str {
        OPENWEATHER_PROVIDER_NAME
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_weather(
        &self,
        lat: f64,
        lon: f64,
        _elevation: Option<f64>,
        time: DateTime<Utc>,
    ) -> Result<WeatherRecord, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ProviderError::Http {
            status: 401,
            message: "No OpenWeatherMap API key configured".to_string(),
        })?;

        let parsed = self.fetch_forecast(lat, lon, api_key).await?;

        let target_ts = time.timestamp();
        let entry = parsed
            .list
            .iter()
            .min_by_key(|e| (e.dt - target_ts).unsigned_abs())
            .ok_or_else(|| {
                ProviderError::Data("OpenWeatherMap forecast contained no data".to_string())
            })?;

        let timezone = parsed
            .city
            .and_then(|c| c.timezone)
            .map(format_utc_offset);

        transform_entry(entry, timezone)
    }
}

fn transform_entry(
    entry: &OwForecastEntry,
    timezone: Option<String>,
) -> Result<WeatherRecord, ProviderError> {
    let time = DateTime::from_timestamp(entry.dt, 0).ok_or_else(|| {
        ProviderError::Data(format!("OpenWeatherMap timestamp out of range: {}", entry.dt))
    })?;

    let (icon, description) = entry
        .weather
        .first()
        .map(|w| (w.icon.clone(), w.description.clone()))
        .unwrap_or_else(|| ("unknown".to_string(), "Unknown".to_string()));

    let volume = |v: &Option<OwVolume>| v.as_ref().and_then(|v| v.three_hours).unwrap_or(0.0);
    let precipitation = volume(&entry.rain) + volume(&entry.snow);

    let wind = entry.wind.as_ref();

    Ok(WeatherRecord {
        temperature: round_1dp(entry.main.temp),
        feels_like: round_1dp(entry.main.feels_like),
        humidity: round_1dp(entry.main.humidity),
        wind_speed: ms_to_kmh(wind.map(|w| w.speed).unwrap_or(0.0)),
        wind_gust: opt_ms_to_kmh(wind.and_then(|w| w.gust)),
        wind_direction: round_1dp(wind.and_then(|w| w.deg).unwrap_or(0.0)),
        precipitation: round_1dp(precipitation),
        precipitation_probability: entry.pop.unwrap_or(0.0),
        precipitation_type: infer_precipitation_type(&description, entry.main.temp, precipitation),
        pressure: round_1dp(entry.main.pressure),
        cloud_cover: round_1dp(entry.clouds.as_ref().map(|c| c.all).unwrap_or(0.0)),
        uv_index: None,
        weather_icon: icon,
        weather_description: description,
        time: time.to_rfc3339(),
        timezone,
        provider: OPENWEATHER_PROVIDER_NAME.to_string(),
    })
}
