//! Track HTTP endpoints.
//!
//! - POST /api/v1/tracks/parse (raw GPX body)
//! - POST /api/v1/tracks/forecast-points
//! - POST /api/v1/tracks/forecast (parse, sample and resolve weather)

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::weather::resolve_points;
use crate::routes::AppState;
use crate::services::gpx::{parse_gpx, Track, TrackPoint};
use crate::services::sampler::{forecast_point_count, generate_forecast_points, ForecastPoint};
use crate::services::weather::WeatherRecord;

/// Route aggregates without the point list.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub name: String,
    /// Total route length in km
    pub total_distance: f64,
    /// Cumulative ascent in metres
    pub elevation_gain: f64,
    /// Cumulative descent in metres
    pub elevation_loss: f64,
    pub max_elevation: f64,
    pub min_elevation: f64,
    pub point_count: usize,
}

impl From<&Track> for TrackSummary {
    fn from(t: &Track) -> Self {
        Self {
            name: t.name.clone(),
            total_distance: t.total_distance,
            elevation_gain: t.elevation_gain,
            elevation_loss: t.elevation_loss,
            max_elevation: t.max_elevation,
            min_elevation: t.min_elevation,
            point_count: t.points.len(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParsedTrackResponse {
    pub track: TrackSummary,
    /// Track points annotated with cumulative distance
    pub points: Vec<TrackPoint>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPointsRequest {
    /// GPX document
    pub gpx: String,
    /// Spacing between forecast points in km
    pub interval_km: f64,
    /// Departure time in RFC 3339 format (e.g. "2026-06-01T08:00:00Z")
    pub start_time: String,
    /// Constant average speed in km/h
    pub avg_speed_kmh: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ForecastPointsResponse {
    pub track: TrackSummary,
    pub points: Vec<ForecastPoint>,
}

/// Route forecast: sampled points and the weather resolved for each.
#[derive(Debug, Serialize, ToSchema)]
pub struct RouteForecastResponse {
    pub track: TrackSummary,
    pub points: Vec<ForecastPoint>,
    /// `weather[i]` belongs to `points[i]`; `null` when unresolved
    pub weather: Vec<Option<WeatherRecord>>,
    /// Number of points with weather
    pub resolved: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse a GPX document into an annotated track.
#[utoipa::path(
    post,
    path = "/api/v1/tracks/parse",
    tag = "Tracks",
    request_body(content = String, content_type = "application/gpx+xml", description = "GPX document"),
    responses(
        (status = 200, description = "Parsed track", body = ParsedTrackResponse),
        (status = 400, description = "Malformed GPX or no track points", body = ErrorResponse),
    )
)]
pub async fn parse_track(body: String) -> Result<Json<ParsedTrackResponse>, AppError> {
    let track = parse_gpx(&body)?;
    tracing::debug!(
        "Parsed track '{}': {} points, {:.2} km",
        track.name,
        track.points.len(),
        track.total_distance
    );

    Ok(Json(ParsedTrackResponse {
        track: TrackSummary::from(&track),
        points: track.points,
    }))
}

/// Sample forecast points along a GPX route.
#[utoipa::path(
    post,
    path = "/api/v1/tracks/forecast-points",
    tag = "Tracks",
    request_body = ForecastPointsRequest,
    responses(
        (status = 200, description = "Forecast points along the route", body = ForecastPointsResponse),
        (status = 400, description = "Malformed GPX, interval, speed or start time, or too many points", body = ErrorResponse),
    )
)]
pub async fn forecast_points(
    State(state): State<AppState>,
    payload: Result<Json<ForecastPointsRequest>, JsonRejection>,
) -> Result<Json<ForecastPointsResponse>, AppError> {
    let Json(request) = payload?;
    let (track, points) = sample_route(&request, state.config.max_forecast_points)?;

    Ok(Json(ForecastPointsResponse {
        track: TrackSummary::from(&track),
        points,
    }))
}

/// Parse, sample and resolve weather for a GPX route.
#[utoipa::path(
    post,
    path = "/api/v1/tracks/forecast",
    tag = "Tracks",
    request_body = ForecastPointsRequest,
    responses(
        (status = 200, description = "Route forecast", body = RouteForecastResponse),
        (status = 400, description = "Invalid input or too many forecast points", body = ErrorResponse),
        (status = 502, description = "No point could be resolved", body = RouteForecastResponse),
        (status = 503, description = "No weather provider available", body = ErrorResponse),
    )
)]
pub async fn route_forecast(
    State(state): State<AppState>,
    payload: Result<Json<ForecastPointsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RouteForecastResponse>), AppError> {
    let Json(request) = payload?;
    let (track, points) = sample_route(&request, state.config.max_batch_points)?;

    let (status, batch) = resolve_points(&state, &points).await?;
    let resolved = batch.data.iter().filter(|r| r.is_some()).count();

    Ok((
        status,
        Json(RouteForecastResponse {
            track: TrackSummary::from(&track),
            points,
            weather: batch.data,
            resolved,
            success: batch.success,
            error: batch.error,
        }),
    ))
}

/// Parse and sample the requested route, refusing before sampling when it
/// would yield more than `max_points` points.
fn sample_route(
    request: &ForecastPointsRequest,
    max_points: usize,
) -> Result<(Track, Vec<ForecastPoint>), AppError> {
    let start_time: DateTime<Utc> = DateTime::parse_from_rfc3339(&request.start_time)
        .map_err(|e| {
            AppError::BadRequest(format!(
                "Invalid startTime '{}': expected RFC 3339 ({})",
                request.start_time, e
            ))
        })?
        .with_timezone(&Utc);

    let track = parse_gpx(&request.gpx)?;

    let count = forecast_point_count(&track, request.interval_km)?;
    if count > max_points {
        return Err(AppError::BadRequest(format!(
            "Route yields {} forecast points (maximum {}); use a larger intervalKm",
            count, max_points
        )));
    }

    let points = generate_forecast_points(
        &track,
        request.interval_km,
        start_time,
        request.avg_speed_kmh,
    )?;

    tracing::debug!(
        "Sampled {} forecast points along '{}' every {} km",
        points.len(),
        track.name,
        request.interval_km
    );

    Ok((track, points))
}
