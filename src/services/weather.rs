//! Common weather record shape produced by every provider adapter.
//!
//! Adapters transform vendor JSON into [`WeatherRecord`]; the resolver only
//! hands out records that pass [`WeatherRecord::validate`].

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Realistic sea-level pressure bounds (hPa).
const PRESSURE_MIN_HPA: f64 = 800.0;
const PRESSURE_MAX_HPA: f64 = 1200.0;

/// A transformed provider response failed range checks.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid weather field '{field}' = {value}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: f64,
    pub message: String,
}

/// Resolved weather for one forecast point.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WeatherRecord {
    /// Air temperature in Celsius
    pub temperature: f64,
    /// Feels-like temperature in Celsius
    pub feels_like: f64,
    /// Relative humidity (0-100)
    pub humidity: f64,
    /// Wind speed in km/h
    pub wind_speed: f64,
    /// Wind gust speed in km/h
    pub wind_gust: Option<f64>,
    /// Direction the wind blows from, degrees (0 = north, 90 = east)
    pub wind_direction: f64,
    /// Precipitation amount in mm
    pub precipitation: f64,
    /// Probability of precipitation (0-1)
    pub precipitation_probability: f64,
    /// "snow", "sleet", "rain" or "none"
    pub precipitation_type: String,
    /// Air pressure at sea level in hPa
    pub pressure: f64,
    /// Cloud cover percentage (0-100)
    pub cloud_cover: f64,
    /// UV index, when the provider reports one
    pub uv_index: Option<f64>,
    /// Provider icon code (e.g. "lightrain_day", "10d")
    pub weather_icon: String,
    /// Human-readable condition
    pub weather_description: String,
    /// Time the data is valid for (ISO 8601)
    pub time: String,
    /// UTC offset of the location, when the provider reports one
    pub timezone: Option<String>,
    /// Name of the provider that produced this record
    pub provider: String,
}

impl WeatherRecord {
    /// Range-check the record. Values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("temperature", self.temperature, -100.0, 70.0)?;
        check_range("feelsLike", self.feels_like, -120.0, 90.0)?;
        check_range("humidity", self.humidity, 0.0, 100.0)?;
        check_range("windSpeed", self.wind_speed, 0.0, 500.0)?;
        if let Some(gust) = self.wind_gust {
            check_range("windGust", gust, 0.0, 500.0)?;
        }
        check_range("windDirection", self.wind_direction, 0.0, 360.0)?;
        check_range("precipitation", self.precipitation, 0.0, 1000.0)?;
        check_range(
            "precipitationProbability",
            self.precipitation_probability,
            0.0,
            1.0,
        )?;
        check_range("pressure", self.pressure, PRESSURE_MIN_HPA, PRESSURE_MAX_HPA)?;
        check_range("cloudCover", self.cloud_cover, 0.0, 100.0)?;
        if let Some(uv) = self.uv_index {
            check_range("uvIndex", uv, 0.0, 30.0)?;
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError {
            field,
            value,
            message: "must be a finite number".to_string(),
        });
    }
    if value < min || value > max {
        return Err(ValidationError {
            field,
            value,
            message: format!("outside [{}, {}]", min, max),
        });
    }
    Ok(())
}

/// Calculate the "feels like" temperature using the North American Wind Chill Index.
///
/// Formula: 13.12 + 0.6215*T - 11.37*V^0.16 + 0.3965*T*V^0.16
/// Applied when T <= 10°C and V >= 4.8 km/h.
pub fn calculate_feels_like(temperature_c: f64, wind_speed_kmh: f64) -> f64 {
    if temperature_c > 10.0 || wind_speed_kmh < 4.8 {
        return temperature_c;
    }

    let v016 = wind_speed_kmh.powf(0.16);
    13.12 + 0.6215 * temperature_c - 11.37 * v016 + 0.3965 * temperature_c * v016
}

/// Infer precipitation type from a condition code/description and temperature.
///
/// Primary: the condition text (contains "snow", "sleet", "rain", "drizzle").
/// Fallback: temperature-based heuristic.
pub fn infer_precipitation_type(condition: &str, temperature_c: f64, precipitation_mm: f64) -> String {
    if precipitation_mm <= 0.0 {
        return "none".to_string();
    }

    let lower = condition.to_lowercase();
    if lower.contains("snow") {
        return "snow".to_string();
    }
    if lower.contains("sleet") {
        return "sleet".to_string();
    }
    if lower.contains("rain") || lower.contains("drizzle") {
        return "rain".to_string();
    }

    if temperature_c < 0.0 {
        "snow".to_string()
    } else if temperature_c <= 2.0 {
        "sleet".to_string()
    } else {
        "rain".to_string()
    }
}

/// Turn a yr.no symbol code into a readable description.
///
/// `lightrainshowersandthunder_day` → "Light rain showers and thunder".
pub fn describe_symbol(symbol_code: &str) -> String {
    let base = symbol_code
        .split('_')
        .next()
        .unwrap_or(symbol_code)
        .to_lowercase();

    const TOKENS: &[&str] = &[
        "partlycloudy",
        "clearsky",
        "thunder",
        "showers",
        "cloudy",
        "light",
        "heavy",
        "sleet",
        "snow",
        "rain",
        "fair",
        "and",
        "fog",
    ];

    let mut words: Vec<&str> = Vec::new();
    let mut rest = base.as_str();
    while !rest.is_empty() {
        match TOKENS.iter().find(|t| rest.starts_with(**t)) {
            Some(token) => {
                words.push(match *token {
                    "partlycloudy" => "partly cloudy",
                    "clearsky" => "clear sky",
                    other => other,
                });
                rest = &rest[token.len()..];
            }
            None => {
                // Unknown code: keep it as-is rather than guess
                return capitalize(&base);
            }
        }
    }

    if words.is_empty() {
        return "Unknown".to_string();
    }
    capitalize(&words.join(" "))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
