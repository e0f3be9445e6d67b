//! Forecast point sampling along a parsed track.
//!
//! Steps along the track every `interval_km`, interpolating coordinates between
//! the bracketing track points, and assigns each sample an estimated arrival
//! time from a constant average speed. The first and last track positions are
//! always included.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::gpx::{Track, TrackPoint};

/// Stepped samples closer than this to the route end are dropped in favour of
/// the endpoint itself (km).
pub const ENDPOINT_EPSILON_KM: f64 = 0.01;

/// Errors for caller-supplied sampling parameters.
#[derive(Debug, Error, PartialEq)]
pub enum SamplerError {
    #[error("Invalid interval: interval_km must be a positive number, got {0}")]
    InvalidInterval(f64),
    #[error("Invalid interval: avg_speed_kmh must be a positive number, got {0}")]
    InvalidSpeed(f64),
}

/// One along-route sample selected for weather lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    /// Latitude (WGS84)
    pub lat: f64,
    /// Longitude (WGS84)
    pub lon: f64,
    /// Interpolated elevation in metres, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// Cumulative distance from the route start in km
    pub distance: f64,
    /// Estimated arrival time (Unix seconds)
    pub timestamp: i64,
    /// Position in the generated sequence
    #[serde(default)]
    pub index: usize,
}

impl ForecastPoint {
    /// Estimated arrival time as a UTC datetime.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Number of points [`generate_forecast_points`] returns for `track` at
/// `interval_km`, computed without sampling.
///
/// Lets callers enforce a point cap before anything is allocated.
pub fn forecast_point_count(track: &Track, interval_km: f64) -> Result<usize, SamplerError> {
    check_interval(interval_km)?;
    if track.points.is_empty() {
        return Ok(0);
    }
    let endpoint = usize::from(track.total_distance > 0.0);
    Ok(1usize
        .saturating_add(stepped_count(track.total_distance, interval_km))
        .saturating_add(endpoint))
}

/// Generate evenly spaced forecast points along `track`.
///
/// Returns an empty sequence for a track without points.
pub fn generate_forecast_points(
    track: &Track,
    interval_km: f64,
    start_time: DateTime<Utc>,
    avg_speed_kmh: f64,
) -> Result<Vec<ForecastPoint>, SamplerError> {
    check_interval(interval_km)?;
    // `!(x > 0.0)` also rejects NaN
    if !(avg_speed_kmh > 0.0) || !avg_speed_kmh.is_finite() {
        return Err(SamplerError::InvalidSpeed(avg_speed_kmh));
    }

    let (first, last) = match (track.points.first(), track.points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Ok(Vec::new()),
    };

    let start_ts = start_time.timestamp();
    let total = track.total_distance;
    let arrival = |distance: f64| start_ts + (distance / avg_speed_kmh * 3600.0).round() as i64;
    let steps = stepped_count(total, interval_km);

    let mut points = Vec::with_capacity(steps + 2);
    points.push(ForecastPoint {
        lat: first.lat,
        lon: first.lon,
        elevation: Some(first.elevation),
        distance: 0.0,
        timestamp: start_ts,
        index: 0,
    });

    // Multiply instead of accumulating so long routes don't drift
    for step in 1..=steps {
        let target = interval_km * step as f64;
        let (lat, lon, elevation) = interpolate_at(&track.points, target);
        points.push(ForecastPoint {
            lat,
            lon,
            elevation: Some(elevation),
            distance: target,
            timestamp: arrival(target),
            index: points.len(),
        });
    }

    if total > 0.0 {
        points.push(ForecastPoint {
            lat: last.lat,
            lon: last.lon,
            elevation: Some(last.elevation),
            distance: total,
            timestamp: arrival(total),
            index: points.len(),
        });
    }

    Ok(points)
}

fn check_interval(interval_km: f64) -> Result<(), SamplerError> {
    if !(interval_km > 0.0) || !interval_km.is_finite() {
        return Err(SamplerError::InvalidInterval(interval_km));
    }
    Ok(())
}

/// Stepped samples strictly inside the route: targets `k * interval_km`
/// (k >= 1) that fall short of `total - ENDPOINT_EPSILON_KM`.
fn stepped_count(total: f64, interval_km: f64) -> usize {
    let steps = ((total - ENDPOINT_EPSILON_KM) / interval_km).ceil() - 1.0;
    if steps > 0.0 {
        // Float to int casts saturate
        steps as usize
    } else {
        0
    }
}

/// Linearly interpolate (lat, lon, elevation) at `target` km along `points`.
///
/// `points` must be non-empty and sorted by distance.
fn interpolate_at(points: &[TrackPoint], target: f64) -> (f64, f64, f64) {
    // First index whose distance is >= target
    let after_idx = points.partition_point(|p| p.distance < target);
    if after_idx == 0 {
        let p = &points[0];
        return (p.lat, p.lon, p.elevation);
    }
    if after_idx >= points.len() {
        let p = &points[points.len() - 1];
        return (p.lat, p.lon, p.elevation);
    }

    let before = &points[after_idx - 1];
    let after = &points[after_idx];
    let span = after.distance - before.distance;
    if span <= 0.0 {
        return (after.lat, after.lon, after.elevation);
    }

    let ratio = (target - before.distance) / span;
    (
        before.lat + (after.lat - before.lat) * ratio,
        before.lon + (after.lon - before.lon) * ratio,
        before.elevation + (after.elevation - before.elevation) * ratio,
    )
}
