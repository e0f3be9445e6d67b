//! GPX track parser.
//!
//! Reads `<trkpt>` and `<rtept>` elements in document order and builds a
//! distance-annotated [`Track`]:
//! - cumulative great-circle distance (haversine, km) per point
//! - elevation gain/loss and min/max elevation
//! - route name from `<metadata><name>`, falling back to the first
//!   `<trk>`/`<rte>` name, then "Unnamed Route"

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Mean Earth radius used by the haversine formula (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Name used when the GPX carries no usable `<name>` element.
pub const UNNAMED_ROUTE: &str = "Unnamed Route";

/// Errors that can occur during GPX parsing.
#[derive(Debug, Error)]
pub enum GpxError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("No track points found: expected at least one <trkpt> or <rtept>")]
    NoPoints,
    #[error("Invalid track point #{index}: {message}")]
    InvalidPoint { index: usize, message: String },
}

/// One raw sample from the GPX file.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    /// Latitude (WGS84, decimal degrees)
    pub lat: f64,
    /// Longitude (WGS84, decimal degrees)
    pub lon: f64,
    /// Elevation in metres (0 when absent from the GPX)
    pub elevation: f64,
    /// Recorded time of the point, if the GPX has one
    pub time: Option<DateTime<Utc>>,
    /// Cumulative distance from the first point in km
    pub distance: f64,
}

/// A parsed route with its aggregates.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub name: String,
    pub points: Vec<TrackPoint>,
    /// Equal to the last point's `distance`
    pub total_distance: f64,
    /// Sum of positive elevation deltas (m)
    pub elevation_gain: f64,
    /// Sum of negative elevation deltas, as a positive magnitude (m)
    pub elevation_loss: f64,
    pub max_elevation: f64,
    pub min_elevation: f64,
}

/// Great-circle distance between two coordinates in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let sin_dphi = (dphi / 2.0).sin();
    let sin_dlambda = (dlambda / 2.0).sin();

    let h = sin_dphi * sin_dphi + phi1.cos() * phi2.cos() * sin_dlambda * sin_dlambda;
    // Clamp guards asin against h drifting just above 1.0 for antipodal points
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// A point as read from the markup, before distances are computed.
struct RawPoint {
    lat: f64,
    lon: f64,
    elevation: f64,
    time: Option<DateTime<Utc>>,
}

/// Which `<name>` element is currently being read.
#[derive(Clone, Copy, PartialEq)]
enum NameSource {
    Metadata,
    TrackOrRoute,
}

/// Parse GPX XML content into a [`Track`].
pub fn parse_gpx(gpx_xml: &str) -> Result<Track, GpxError> {
    let mut reader = Reader::from_str(gpx_xml);

    let mut metadata_name: Option<String> = None;
    let mut track_name: Option<String> = None;
    let mut raw_points: Vec<RawPoint> = Vec::new();

    // Current point state (while inside a <trkpt>/<rtept> element)
    let mut in_point = false;
    let mut point_lat = 0.0;
    let mut point_lon = 0.0;
    let mut point_ele: Option<f64> = None;
    let mut point_time: Option<DateTime<Utc>> = None;

    // Nesting context
    let mut in_metadata = false;
    let mut in_author = false;
    let mut in_trk_or_rte = false;

    // Text-capturing element
    let mut reading_name: Option<NameSource> = None;
    let mut reading_ele = false;
    let mut reading_time = false;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                match local.as_str() {
                    "metadata" => in_metadata = true,
                    "author" if in_metadata => in_author = true,
                    "trk" | "rte" => in_trk_or_rte = true,
                    "trkpt" | "rtept" => {
                        let (lat, lon) = read_coordinates(e, raw_points.len())?;
                        point_lat = lat;
                        point_lon = lon;
                        point_ele = None;
                        point_time = None;
                        in_point = true;
                    }
                    "name" if in_metadata && !in_author => {
                        reading_name = Some(NameSource::Metadata);
                    }
                    "name" if in_trk_or_rte && !in_point => {
                        reading_name = Some(NameSource::TrackOrRoute);
                    }
                    "ele" if in_point => reading_ele = true,
                    "time" if in_point => reading_time = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                // Self-closing <trkpt lat=".." lon=".."/> carries no children
                let local = local_name_str(e.name().as_ref());
                if local == "trkpt" || local == "rtept" {
                    let (lat, lon) = read_coordinates(e, raw_points.len())?;
                    raw_points.push(RawPoint {
                        lat,
                        lon,
                        elevation: 0.0,
                        time: None,
                    });
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.trim().to_string(),
                    Err(err) if reading_ele => {
                        return Err(GpxError::InvalidPoint {
                            index: raw_points.len(),
                            message: format!("<ele> contains a malformed entity: {}", err),
                        });
                    }
                    Err(err) => return Err(GpxError::Xml(err)),
                };
                if text.is_empty() {
                    buf.clear();
                    continue;
                }
                if reading_ele {
                    let ele: f64 = text.parse().map_err(|_| GpxError::InvalidPoint {
                        index: raw_points.len(),
                        message: format!("<ele> is not a valid number: '{}'", text),
                    })?;
                    if !ele.is_finite() {
                        return Err(GpxError::InvalidPoint {
                            index: raw_points.len(),
                            message: format!("<ele> must be finite, got '{}'", text),
                        });
                    }
                    point_ele = Some(ele);
                } else if reading_time {
                    match DateTime::parse_from_rfc3339(&text) {
                        Ok(dt) => point_time = Some(dt.with_timezone(&Utc)),
                        Err(e) => {
                            tracing::warn!(
                                "Ignoring malformed <time> '{}' on track point #{}: {}",
                                text,
                                raw_points.len(),
                                e
                            );
                        }
                    }
                } else if let Some(source) = reading_name {
                    match source {
                        NameSource::Metadata if metadata_name.is_none() => {
                            metadata_name = Some(text);
                        }
                        NameSource::TrackOrRoute if track_name.is_none() => {
                            track_name = Some(text);
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                match local.as_str() {
                    "metadata" => in_metadata = false,
                    "author" => in_author = false,
                    "trk" | "rte" => in_trk_or_rte = false,
                    "name" => reading_name = None,
                    "ele" => reading_ele = false,
                    "time" => reading_time = false,
                    "trkpt" | "rtept" if in_point => {
                        raw_points.push(RawPoint {
                            lat: point_lat,
                            lon: point_lon,
                            elevation: point_ele.unwrap_or(0.0),
                            time: point_time.take(),
                        });
                        in_point = false;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(GpxError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    if raw_points.is_empty() {
        return Err(GpxError::NoPoints);
    }

    let name = metadata_name
        .or(track_name)
        .unwrap_or_else(|| UNNAMED_ROUTE.to_string());

    Ok(build_track(name, raw_points))
}

/// Annotate raw points with cumulative distance and compute aggregates.
fn build_track(name: String, raw_points: Vec<RawPoint>) -> Track {
    let mut points: Vec<TrackPoint> = Vec::with_capacity(raw_points.len());
    let mut distance = 0.0;
    let mut elevation_gain = 0.0;
    let mut elevation_loss = 0.0;
    let mut max_elevation = f64::NEG_INFINITY;
    let mut min_elevation = f64::INFINITY;

    for raw in raw_points {
        if let Some(prev) = points.last() {
            distance += haversine_km(prev.lat, prev.lon, raw.lat, raw.lon);
            let delta = raw.elevation - prev.elevation;
            if delta > 0.0 {
                elevation_gain += delta;
            } else {
                elevation_loss += -delta;
            }
        }
        max_elevation = max_elevation.max(raw.elevation);
        min_elevation = min_elevation.min(raw.elevation);

        points.push(TrackPoint {
            lat: raw.lat,
            lon: raw.lon,
            elevation: raw.elevation,
            time: raw.time,
            distance,
        });
    }

    Track {
        name,
        points,
        total_distance: distance,
        elevation_gain,
        elevation_loss,
        max_elevation,
        min_elevation,
    }
}

/// Read and validate the `lat`/`lon` attributes of a point element.
fn read_coordinates(e: &BytesStart<'_>, index: usize) -> Result<(f64, f64), GpxError> {
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        let val = std::str::from_utf8(&attr.value).unwrap_or("");
        match key {
            "lat" => lat = Some(parse_coordinate(index, "lat", val, 90.0)?),
            "lon" => lon = Some(parse_coordinate(index, "lon", val, 180.0)?),
            _ => {}
        }
    }

    let lat = lat.ok_or_else(|| GpxError::InvalidPoint {
        index,
        message: "missing 'lat' attribute".to_string(),
    })?;
    let lon = lon.ok_or_else(|| GpxError::InvalidPoint {
        index,
        message: "missing 'lon' attribute".to_string(),
    })?;
    Ok((lat, lon))
}

fn parse_coordinate(index: usize, field: &str, raw: &str, limit: f64) -> Result<f64, GpxError> {
    let v: f64 = raw.trim().parse().map_err(|_| GpxError::InvalidPoint {
        index,
        message: format!("{}='{}' is not a valid number", field, raw),
    })?;
    // NaN fails the range check as well, since every comparison with NaN is false
    if !(-limit..=limit).contains(&v) {
        return Err(GpxError::InvalidPoint {
            index,
            message: format!("{}={} is outside [-{}, {}]", field, raw, limit, limit),
        });
    }
    Ok(v)
}

/// Extract the local name from a potentially namespaced XML element name.
/// e.g. `gpx:trkpt` -> `trkpt`, `trkpt` -> `trkpt`
fn local_name_str(full: &[u8]) -> String {
    let s = std::str::from_utf8(full).unwrap_or("");
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}
