//! Stamp normalization.
//!
//! Everything inside the core runs on epoch milliseconds. Inbound rows may
//! carry seconds, milliseconds, or an ISO-8601 string.

/// Seconds/milliseconds pivot: anything below this is taken to be seconds.
/// (The year 2100 in seconds; timestamps in milliseconds passed this in 1970.)
const MILLI_PIVOT: i64 = 4_102_444_800;

/// Ensure a stamp is milliseconds since epoch.
#[inline]
pub const fn fix_milli(stamp: i64) -> i64 {
    if stamp < MILLI_PIVOT {
        stamp * 1000
    } else {
        stamp
    }
}

/// Milliseconds since epoch, right now.
pub fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

/// Parse an ISO-8601 timestamp into epoch milliseconds.
///
/// Accepts anything `jiff` will (`2024-01-01T00:00:00Z`, offsets, fractional
/// seconds). Returns `None` on garbage.
pub fn parse_stamp(text: &str) -> Option<i64> {
    text.parse::<jiff::Timestamp>()
        .ok()
        .map(|ts| ts.as_millisecond())
}

/// Render epoch milliseconds as an ISO-8601 UTC string.
pub fn to_iso8601(stamp_ms: i64) -> String {
    match jiff::Timestamp::from_millisecond(fix_milli(stamp_ms)) {
        Ok(ts) => ts.to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_scaled_to_milliseconds() {
        assert_eq!(fix_milli(1_704_067_200), 1_704_067_200_000);
        assert_eq!(fix_milli(1_704_067_200_000), 1_704_067_200_000);
        assert_eq!(fix_milli(0), 0);
    }

    #[test]
    fn iso_round_trip() {
        let ms = parse_stamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ms, 1_704_067_200_000);
        assert_eq!(to_iso8601(ms), "2024-01-01T00:00:00Z");

        assert_eq!(parse_stamp("not a stamp"), None);
    }

    #[test]
    fn offsets_normalize_to_utc() {
        assert_eq!(
            parse_stamp("2024-01-01T02:00:00+02:00"),
            parse_stamp("2024-01-01T00:00:00Z")
        );
    }
}
