use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::routes::AppState;

/// Availability of one weather provider.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderHealth {
    pub name: String,
    pub available: bool,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status ("ok" when a weather provider is usable, "degraded" otherwise)
    pub status: String,
    /// API version
    pub version: String,
    /// Providers in fallback order
    pub providers: Vec<ProviderHealth>,
    /// Weather lookups currently in flight
    pub in_flight_lookups: usize,
}

/// Health check endpoint.
///
/// Returns status "degraded" (still 200) when no weather provider is
/// available, so load balancers can distinguish partial failures.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers: Vec<ProviderHealth> = state
        .resolver
        .provider_statuses()
        .await
        .into_iter()
        .map(|s| ProviderHealth {
            name: s.name,
            available: s.available,
        })
        .collect();

    let any_available = providers.iter().any(|p| p.available);

    Json(HealthResponse {
        status: if any_available {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers,
        in_flight_lookups: state.resolver.in_flight_count(),
    })
}
