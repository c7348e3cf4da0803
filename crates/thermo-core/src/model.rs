//! Measurement value formatting.
//!
//! All user-visible representations of sensor readings go through these
//! helpers so the web UI, the JSON endpoint and the plain-text endpoints
//! agree on how an unknown value looks.

/// The string used wherever a value has never been measured or failed to read.
pub const UNKNOWN: &str = "Unknown";

/// Format a measurement with two decimal digits, or [`UNKNOWN`] for NaN.
///
/// NaN is the in-band marker for "no valid reading yet", matching the
/// sensor drivers feeding the store.
pub fn format_measurement(value: f32) -> String {
    if value.is_nan() {
        UNKNOWN.to_string()
    } else {
        format!("{:.2}", value)
    }
}

/// Format a millisecond timespan as `HH:MM:SS.mmm`, or [`UNKNOWN`] for `None`.
///
/// Hours wrap at 24; the uptime counter on the device wraps after ~50 days
/// anyway, so longer spans are not representable.
pub fn format_timespan(time_ms: Option<u64>) -> String {
    match time_ms {
        None => UNKNOWN.to_string(),
        Some(ms) => format!(
            "{:02}:{:02}:{:02}.{:03}",
            ms / 3_600_000 % 24,
            ms / 60_000 % 60,
            ms / 1_000 % 60,
            ms % 1_000
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_measurement() {
        assert_eq!(format_measurement(21.5), "21.50");
        assert_eq!(format_measurement(-3.125), "-3.12");
        assert_eq!(format_measurement(f32::NAN), "Unknown");
        assert_eq!(format_measurement(0.0), "0.00");
    }

    #[test]
    fn test_format_timespan() {
        assert_eq!(format_timespan(None), "Unknown");
        assert_eq!(format_timespan(Some(0)), "00:00:00.000");
        assert_eq!(format_timespan(Some(1_000)), "00:00:01.000");
        assert_eq!(format_timespan(Some(3_600_000 + 23 * 60_000 + 45_678)), "01:23:45.678");
    }

    #[test]
    fn test_format_timespan_wraps_after_a_day() {
        // 25 hours render as 01, like the reference UI expects.
        assert_eq!(format_timespan(Some(25 * 3_600_000)), "01:00:00.000");
    }
}
