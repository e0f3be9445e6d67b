pub mod health;
pub mod tracks;
pub mod weather;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::resolver::WeatherResolver;

/// Shared application state for all endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) resolver: WeatherResolver,
    pub(crate) config: Arc<AppConfig>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::openweather::{OpenWeatherProvider, OPENWEATHER_API_URL};
    use crate::services::resolver::{ProviderSlot, ResolverOptions};
    use crate::services::yr::{YrProvider, YR_API_URL};

    pub(crate) fn test_config() -> AppConfig {
        AppConfig::from_lookup(|_| None).unwrap()
    }

    pub(crate) fn state_with_providers(providers: Vec<ProviderSlot>) -> AppState {
        let config = test_config();
        let resolver = WeatherResolver::new(
            providers,
            ResolverOptions {
                provider_timeout: config.provider_timeout,
                max_concurrency: config.max_concurrent_lookups,
            },
        );
        AppState {
            resolver,
            config: Arc::new(config),
        }
    }

    /// yr.no (optionally pointed at a mock server) plus an OpenWeatherMap
    /// provider without API key.
    pub(crate) fn test_state(yr_base_url: Option<&str>) -> AppState {
        let client = reqwest::Client::new();
        let yr = YrProvider::new(
            client.clone(),
            yr_base_url.unwrap_or(YR_API_URL),
            "RouteWeatherTest/0.1",
        );
        let openweather = OpenWeatherProvider::new(client, OPENWEATHER_API_URL, None);
        state_with_providers(vec![
            ProviderSlot::new(Arc::new(yr), 1000.0),
            ProviderSlot::new(Arc::new(openweather), 1000.0),
        ])
    }
}
