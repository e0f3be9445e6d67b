//! Shared numeric helpers for provider transforms and request validation.
//!
//! Weather values are rounded to 1 decimal place before they leave a provider
//! adapter, so both providers report with the same precision. Geographic
//! values are never rounded here.

/// Metres per second to kilometres per hour.
const MS_TO_KMH: f64 = 3.6;

/// Round an f64 to 1 decimal place.
///
/// Non-finite inputs are passed through unchanged so that record validation
/// can reject them with a typed error instead of hiding them as zero.
pub(crate) fn round_1dp(v: f64) -> f64 {
    if !v.is_finite() {
        return v;
    }
    (v * 10.0).round() / 10.0
}

/// Round an optional f64 to 1 decimal place, returning None if input is None.
pub(crate) fn opt_round_1dp(v: Option<f64>) -> Option<f64> {
    v.map(round_1dp)
}

/// Convert a speed in m/s to km/h, rounded to 1 decimal place.
pub(crate) fn ms_to_kmh(v: f64) -> f64 {
    round_1dp(v * MS_TO_KMH)
}

/// Convert an optional speed in m/s to km/h.
pub(crate) fn opt_ms_to_kmh(v: Option<f64>) -> Option<f64> {
    v.map(ms_to_kmh)
}

/// Parse a user-supplied numeric field, rejecting NaN and infinities.
///
/// `str::parse::<f64>` accepts "NaN" and "inf", which would otherwise slip
/// through range comparisons (NaN <= 0.0 is false, NaN > 90.0 is also false).
pub(crate) fn parse_finite(field: &str, raw: &str) -> Result<f64, String> {
    let v: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{} must be a number, got '{}'", field, raw))?;
    if !v.is_finite() {
        return Err(format!("{} must be a finite number, got '{}'", field, raw));
    }
    Ok(v)
}

/// Format a UTC offset in seconds as `+HH:MM` / `-HH:MM`.
pub(crate) fn format_utc_offset(offset_secs: i64) -> String {
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.unsigned_abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}
