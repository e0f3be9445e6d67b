//! Weather HTTP endpoints.
//!
//! - POST /api/v1/weather (batch of forecast points)
//! - GET /api/v1/weather?lat=&lon=&distance=&timestamp= (single point)

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::parse_finite;
use crate::routes::AppState;
use crate::services::sampler::ForecastPoint;
use crate::services::weather::WeatherRecord;

/// Error message when points were requested but none could be resolved.
pub const WEATHER_UNAVAILABLE: &str = "weather data unavailable";

#[derive(Debug, Deserialize, ToSchema)]
pub struct WeatherBatchRequest {
    /// Points to resolve, in route order
    pub points: Vec<ForecastPoint>,
}

/// Batch weather response. `data[i]` belongs to `points[i]`; `null` marks a
/// point no provider could resolve.
#[derive(Debug, Serialize, ToSchema)]
pub struct WeatherBatchResponse {
    pub success: bool,
    pub data: Vec<Option<WeatherRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct WeatherQuery {
    /// Latitude in decimal degrees
    pub lat: String,
    /// Longitude in decimal degrees
    pub lon: String,
    /// Distance from the route start in km (defaults to 0)
    pub distance: Option<String>,
    /// Forecast time (Unix seconds)
    pub timestamp: String,
}

/// Reject points that must never reach a provider.
pub(crate) fn validate_point(index: usize, point: &ForecastPoint) -> Result<(), AppError> {
    let invalid = |msg: String| AppError::BadRequest(format!("Invalid point #{}: {}", index, msg));

    if !point.lat.is_finite() || !(-90.0..=90.0).contains(&point.lat) {
        return Err(invalid(format!("lat must be within [-90, 90], got {}", point.lat)));
    }
    if !point.lon.is_finite() || !(-180.0..=180.0).contains(&point.lon) {
        return Err(invalid(format!("lon must be within [-180, 180], got {}", point.lon)));
    }
    if !point.distance.is_finite() || point.distance < 0.0 {
        return Err(invalid(format!(
            "distance must be a non-negative number, got {}",
            point.distance
        )));
    }
    if point.timestamp < 0 || point.time().is_none() {
        return Err(invalid(format!(
            "timestamp must be a non-negative Unix time, got {}",
            point.timestamp
        )));
    }
    if let Some(ele) = point.elevation {
        if !ele.is_finite() {
            return Err(invalid("elevation must be a finite number".to_string()));
        }
    }
    Ok(())
}

/// Validate and resolve `points`, producing the batch contract response.
///
/// Systemic failures (no provider configured or available) are errors; a
/// batch where nothing resolved is a 502 carrying the full, all-null body.
pub(crate) async fn resolve_points(
    state: &AppState,
    points: &[ForecastPoint],
) -> Result<(StatusCode, WeatherBatchResponse), AppError> {
    if points.len() > state.config.max_batch_points {
        return Err(AppError::BadRequest(format!(
            "Too many points: {} (maximum {})",
            points.len(),
            state.config.max_batch_points
        )));
    }
    for (i, point) in points.iter().enumerate() {
        validate_point(i, point)?;
    }

    if points.is_empty() {
        return Ok((
            StatusCode::OK,
            WeatherBatchResponse {
                success: true,
                data: Vec::new(),
                error: None,
            },
        ));
    }

    let data = state.resolver.resolve_batch(points).await?;

    if data.iter().all(|r| r.is_none()) {
        tracing::warn!("No weather resolved for any of {} points", points.len());
        return Ok((
            StatusCode::BAD_GATEWAY,
            WeatherBatchResponse {
                success: false,
                data,
                error: Some(WEATHER_UNAVAILABLE.to_string()),
            },
        ));
    }

    Ok((
        StatusCode::OK,
        WeatherBatchResponse {
            success: true,
            data,
            error: None,
        },
    ))
}

/// Resolve weather for a batch of forecast points.
#[utoipa::path(
    post,
    path = "/api/v1/weather",
    tag = "Weather",
    request_body = WeatherBatchRequest,
    responses(
        (status = 200, description = "At least one point resolved (or the batch was empty)", body = WeatherBatchResponse),
        (status = 400, description = "Malformed body, invalid point or too many points", body = ErrorResponse),
        (status = 502, description = "No point could be resolved", body = WeatherBatchResponse),
        (status = 503, description = "No weather provider available", body = ErrorResponse),
    )
)]
pub async fn post_weather(
    State(state): State<AppState>,
    payload: Result<Json<WeatherBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WeatherBatchResponse>), AppError> {
    let Json(request) = payload?;
    let (status, response) = resolve_points(&state, &request.points).await?;
    Ok((status, Json(response)))
}

/// Resolve weather for a single point.
#[utoipa::path(
    get,
    path = "/api/v1/weather",
    tag = "Weather",
    params(WeatherQuery),
    responses(
        (status = 200, description = "Single-element data array", body = WeatherBatchResponse),
        (status = 400, description = "Missing, non-numeric or out-of-range parameter", body = ErrorResponse),
        (status = 502, description = "The point could not be resolved", body = WeatherBatchResponse),
        (status = 503, description = "No weather provider available", body = ErrorResponse),
    )
)]
pub async fn get_weather(
    State(state): State<AppState>,
    query: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<(StatusCode, Json<WeatherBatchResponse>), AppError> {
    let Query(query) = query?;
    let point = point_from_query(&query)?;
    let (status, response) = resolve_points(&state, std::slice::from_ref(&point)).await?;
    Ok((status, Json(response)))
}

fn point_from_query(query: &WeatherQuery) -> Result<ForecastPoint, AppError> {
    let lat = parse_finite("lat", &query.lat).map_err(AppError::BadRequest)?;
    let lon = parse_finite("lon", &query.lon).map_err(AppError::BadRequest)?;
    let distance = match &query.distance {
        Some(raw) => parse_finite("distance", raw).map_err(AppError::BadRequest)?,
        None => 0.0,
    };
    let timestamp = parse_finite("timestamp", &query.timestamp).map_err(AppError::BadRequest)?;
    if timestamp < 0.0 || timestamp > i64::MAX as f64 {
        return Err(AppError::BadRequest(format!(
            "timestamp must be a non-negative Unix time, got {}",
            query.timestamp
        )));
    }

    Ok(ForecastPoint {
        lat,
        lon,
        elevation: None,
        distance,
        timestamp: timestamp.round() as i64,
        index: 0,
    })
}
