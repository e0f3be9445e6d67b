//! yr.no Locationforecast 2.0 provider (primary).
//!
//! Fetches weather forecasts from the MET Norway API.
//! See: https://api.met.no/weatherapi/locationforecast/2.0/documentation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::helpers::{ms_to_kmh, opt_ms_to_kmh, opt_round_1dp, round_1dp};
use crate::services::provider::{ProviderError, WeatherProvider};
use crate::services::weather::{
    calculate_feels_like, describe_symbol, infer_precipitation_type, WeatherRecord,
};

pub const YR_API_URL: &str = "https://api.met.no/weatherapi/locationforecast/2.0/complete";

pub const YR_PROVIDER_NAME: &str = "yr.no";

/// Provider for the yr.no Locationforecast API.
#[derive(Debug, Clone)]
pub struct YrProvider {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

// --- yr.no JSON response types ---

#[derive(Debug, Deserialize)]
struct YrResponse {
    properties: YrProperties,
}

#[derive(Debug, Deserialize)]
struct YrProperties {
    timeseries: Vec<YrTimeseries>,
}

#[derive(Debug, Deserialize)]
struct YrTimeseries {
    time: String,
    data: YrData,
}

#[derive(Debug, Deserialize)]
struct YrData {
    instant: YrInstant,
    next_1_hours: Option<YrPeriod>,
    next_6_hours: Option<YrPeriod>,
}

#[derive(Debug, Deserialize)]
struct YrInstant {
    details: YrInstantDetails,
}

#[derive(Debug, Deserialize)]
struct YrInstantDetails {
    air_temperature: Option<f64>,
    air_pressure_at_sea_level: Option<f64>,
    wind_speed: Option<f64>,
    wind_from_direction: Option<f64>,
    wind_speed_of_gust: Option<f64>,
    relative_humidity: Option<f64>,
    cloud_area_fraction: Option<f64>,
    ultraviolet_index_clear_sky: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YrPeriod {
    summary: Option<YrSummary>,
    details: Option<YrPeriodDetails>,
}

#[derive(Debug, Deserialize)]
struct YrSummary {
    symbol_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YrPeriodDetails {
    precipitation_amount: Option<f64>,
    probability_of_precipitation: Option<f64>,
}

impl YrProvider {
    pub fn new(client: reqwest::Client, base_url: &str, user_agent: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Fetch the full timeseries from yr.no for a given location.
    async fn fetch_timeseries(
        &self,
        lat: f64,
        lon: f64,
        altitude: Option<f64>,
    ) -> Result<YrResponse, ProviderError> {
        // Limit to 4 decimal places per yr.no terms of service
        let mut query = vec![
            ("lat", format!("{:.4}", lat)),
            ("lon", format!("{:.4}", lon)),
        ];
        if let Some(alt) = altitude {
            query.push(("altitude", format!("{:.0}", alt)));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| ProviderError::Transport(format!("Invalid User-Agent: {}", e)))?,
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("yr.no request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http(status, &body));
        }

        response
            .json::<YrResponse>()
            .await
            .map_err(|e| ProviderError::Data(format!("yr.no JSON parse error: {}", e)))
    }
}

#[async_trait]
impl WeatherProvider for YrProvider {
    fn name(&self) -> &str {
        YR_PROVIDER_NAME
    }

    /// yr.no needs no credentials.
    async fn is_available(&self) -> bool {
        true
    }

    async fn get_weather(
        &self,
        lat: f64,
        lon: f64,
        elevation: Option<f64>,
        time: DateTime<Utc>,
    ) -> Result<WeatherRecord, ProviderError> {
        let response = self.fetch_timeseries(lat, lon, elevation).await?;
        let entry = closest_entry(&response.properties.timeseries, time)?;
        transform_entry(entry)
    }
}

/// Find the timeseries entry closest to `forecast_time`.
fn closest_entry(
    timeseries: &[YrTimeseries],
    forecast_time: DateTime<Utc>,
) -> Result<&YrTimeseries, ProviderError> {
    let target_ts = forecast_time.timestamp();
    timeseries
        .iter()
        .filter_map(|ts| {
            DateTime::parse_from_rfc3339(&ts.time)
                .ok()
                .map(|dt| (ts, (dt.timestamp() - target_ts).unsigned_abs()))
        })
        .min_by_key(|(_, diff)| *diff)
        .map(|(ts, _)| ts)
        .ok_or_else(|| ProviderError::Data("yr.no returned empty timeseries".to_string()))
}

/// Convert a single yr.no timeseries entry into a `WeatherRecord`.
fn transform_entry(entry: &YrTimeseries) -> Result<WeatherRecord, ProviderError> {
    let instant = &entry.data.instant.details;

    let temperature = instant
        .air_temperature
        .ok_or_else(|| ProviderError::Data("yr.no entry has no air_temperature".to_string()))?;
    let pressure = instant.air_pressure_at_sea_level.ok_or_else(|| {
        ProviderError::Data("yr.no entry has no air_pressure_at_sea_level".to_string())
    })?;
    let humidity = instant
        .relative_humidity
        .ok_or_else(|| ProviderError::Data("yr.no entry has no relative_humidity".to_string()))?;

    // Get period data (prefer next_1_hours, fall back to next_6_hours)
    let period = entry
        .data
        .next_1_hours
        .as_ref()
        .or(entry.data.next_6_hours.as_ref());

    let symbol_code = period
        .and_then(|p| p.summary.as_ref())
        .and_then(|s| s.symbol_code.as_ref())
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    let details = period.and_then(|p| p.details.as_ref());
    let precipitation = details.and_then(|d| d.precipitation_amount).unwrap_or(0.0);
    let probability_pct = details
        .and_then(|d| d.probability_of_precipitation)
        .unwrap_or(if precipitation > 0.0 { 100.0 } else { 0.0 });

    let wind_speed = ms_to_kmh(instant.wind_speed.unwrap_or(0.0));
    let feels_like = calculate_feels_like(temperature, wind_speed);

    Ok(WeatherRecord {
        temperature: round_1dp(temperature),
        feels_like: round_1dp(feels_like),
        humidity: round_1dp(humidity),
        wind_speed,
        wind_gust: opt_ms_to_kmh(instant.wind_speed_of_gust),
        wind_direction: round_1dp(instant.wind_from_direction.unwrap_or(0.0)),
        precipitation: round_1dp(precipitation),
        precipitation_probability: probability_pct / 100.0,
        precipitation_type: infer_precipitation_type(&symbol_code, temperature, precipitation),
        pressure: round_1dp(pressure),
        cloud_cover: round_1dp(instant.cloud_area_fraction.unwrap_or(0.0)),
        uv_index: opt_round_1dp(instant.ultraviolet_index_clear_sky),
        weather_description: describe_symbol(&symbol_code),
        weather_icon: symbol_code,
        time: entry.time.clone(),
        timezone: None,
        provider: YR_PROVIDER_NAME.to_string(),
    })
}
