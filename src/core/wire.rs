//! Small helpers shared by the wire serializers.

use serde::Serializer;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest integer an f64 represents exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Milliseconds since the Unix epoch. Times before the epoch are negative.
pub fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => duration_millis(since),
        Err(before) => -duration_millis(before.duration()),
    }
}

/// Whole milliseconds in a duration.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Fractional milliseconds in a duration.
#[allow(clippy::cast_precision_loss)]
pub fn duration_millis_f64(duration: Duration) -> f64 {
    duration.as_secs() as f64 * 1000.0 + f64::from(duration.subsec_nanos()) / 1_000_000.0
}

/// Writes integral floats without a fractional part (`1` rather than `1.0`).
#[allow(clippy::cast_possible_truncation, clippy::trivially_copy_pass_by_ref)]
pub fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < MAX_EXACT_INT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Wrapper {
        #[serde(serialize_with = "serialize_number")]
        v: f64,
    }

    fn render(v: f64) -> String {
        serde_json::to_string(&Wrapper { v }).unwrap()
    }

    #[test]
    fn test_integral_floats_drop_fraction() {
        assert_eq!(render(1.0), r#"{"v":1}"#);
        assert_eq!(render(-3.0), r#"{"v":-3}"#);
        assert_eq!(render(2.5), r#"{"v":2.5}"#);
    }

    #[test]
    fn test_epoch_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_417_136_460_000);
        assert_eq!(epoch_millis(t), 1_417_136_460_000);
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_secs(1)), -1000);
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(duration_millis(Duration::from_secs(2)), 2000);
        assert!((duration_millis_f64(Duration::from_micros(1500)) - 1.5).abs() < f64::EPSILON);
    }
}
