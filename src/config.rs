use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::services::openweather::OPENWEATHER_API_URL;
use crate::services::yr::YR_API_URL;

const DEFAULT_YR_USER_AGENT: &str = "RouteWeather/0.1 github.com/route-weather/route-weather-api";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Identifying User-Agent, required by the MET Norway terms of service.
    pub yr_user_agent: String,
    pub yr_base_url: String,
    pub yr_requests_per_second: f64,
    /// OpenWeatherMap is disabled when unset.
    pub openweather_api_key: Option<String>,
    pub openweather_base_url: String,
    pub openweather_requests_per_second: f64,
    pub provider_timeout: Duration,
    /// Cap on points per batch request and per route forecast.
    pub max_batch_points: usize,
    /// Cap on points returned by the forecast-points endpoint.
    pub max_forecast_points: usize,
    pub max_concurrent_lookups: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            port: parse_var(&lookup, "PORT", "u16", 8080)?,
            yr_user_agent: string_or("YR_USER_AGENT", DEFAULT_YR_USER_AGENT),
            yr_base_url: string_or("YR_BASE_URL", YR_API_URL),
            yr_requests_per_second: positive(parse_var(
                &lookup,
                "YR_REQUESTS_PER_SECOND",
                "positive number",
                10.0,
            )?, "YR_REQUESTS_PER_SECOND")?,
            openweather_api_key: lookup("OPENWEATHER_API_KEY").filter(|k| !k.trim().is_empty()),
            openweather_base_url: string_or("OPENWEATHER_BASE_URL", OPENWEATHER_API_URL),
            openweather_requests_per_second: positive(parse_var(
                &lookup,
                "OPENWEATHER_REQUESTS_PER_SECOND",
                "positive number",
                1.0,
            )?, "OPENWEATHER_REQUESTS_PER_SECOND")?,
            provider_timeout: Duration::from_secs_f64(positive(
                parse_var(&lookup, "PROVIDER_TIMEOUT_SECS", "positive number", 10.0)?,
                "PROVIDER_TIMEOUT_SECS",
            )?),
            max_batch_points: nonzero(
                parse_var(&lookup, "MAX_BATCH_POINTS", "positive integer", 100)?,
                "MAX_BATCH_POINTS",
            )?,
            max_forecast_points: nonzero(
                parse_var(&lookup, "MAX_FORECAST_POINTS", "positive integer", 10_000)?,
                "MAX_FORECAST_POINTS",
            )?,
            max_concurrent_lookups: nonzero(
                parse_var(&lookup, "MAX_CONCURRENT_LOOKUPS", "positive integer", 8)?,
                "MAX_CONCURRENT_LOOKUPS",
            )?,
        })
    }
}

fn parse_var<F, T>(
    lookup: &F,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value: raw,
        }),
    }
}

fn positive(value: f64, name: &'static str) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            expected: "positive number",
            value: value.to_string(),
        })
    }
}

fn nonzero(value: usize, name: &'static str) -> Result<usize, ConfigError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            expected: "positive integer",
            value: value.to_string(),
        })
    }
}
