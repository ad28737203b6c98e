use chrono::{DateTime, SecondsFormat, Utc};

use crate::engine::EngineError;
use crate::model::{Ms, Span};

pub const SLOT_MINUTES: i64 = 15;
pub const MINUTE_MS: Ms = 60_000;
/// Width of one availability slot: 15 minutes.
pub const SLOT_MS: Ms = SLOT_MINUTES * MINUTE_MS;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Parse an ISO-8601 timestamp (offset allowed) into canonical UTC millis.
pub fn parse_utc_iso(value: &str) -> Result<Ms, EngineError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| EngineError::InvalidInput(format!("invalid timestamp: {value}")))
}

/// Format as ISO-8601 UTC with zero offset, e.g. `2026-02-20T10:00:00.000Z`.
pub fn to_iso(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// True iff the instant sits exactly on a 15-minute boundary.
pub fn is_slot_aligned(ms: Ms) -> bool {
    ms.rem_euclid(SLOT_MS) == 0
}

pub fn minutes_between(start: Ms, end: Ms) -> i64 {
    (end - start) / MINUTE_MS
}

pub fn add_minutes(start: Ms, minutes: i64) -> Ms {
    start + minutes * MINUTE_MS
}

/// The ordered, gap-free sequence of slot-start instants covering
/// `[range_start, range_end)`. The range end itself is never included.
pub fn build_timeline(range_start: Ms, range_end: Ms) -> Vec<Ms> {
    let total_minutes = minutes_between(range_start, range_end);
    if total_minutes <= 0 {
        return Vec::new();
    }
    let slot_count = total_minutes / SLOT_MINUTES;
    (0..slot_count).map(|i| range_start + i * SLOT_MS).collect()
}

/// Widen a range outward so both ends land on slot boundaries.
pub fn normalize_to_slot_boundaries(start: Ms, end: Ms) -> (Ms, Ms) {
    let start_rem = start.rem_euclid(SLOT_MS);
    let end_rem = end.rem_euclid(SLOT_MS);
    let normalized_start = start - start_rem;
    let normalized_end = if end_rem == 0 { end } else { end + SLOT_MS - end_rem };
    (normalized_start, normalized_end)
}

/// Compose a UTC range from `YYYY-MM-DD` dates and `HH:mm` times, normalized
/// to slot boundaries. The span must be positive.
pub fn build_utc_range_from_date_and_time(
    date_start: &str,
    date_end: &str,
    time_start: &str,
    time_end: &str,
) -> Result<Span, EngineError> {
    let start = parse_utc_iso(&format!("{date_start}T{time_start}:00Z"))
        .map_err(|_| EngineError::InvalidInput("invalid date/time input".into()))?;
    let end = parse_utc_iso(&format!("{date_end}T{time_end}:00Z"))
        .map_err(|_| EngineError::InvalidInput("invalid date/time input".into()))?;

    let (range_start, range_end) = normalize_to_slot_boundaries(start, end);
    if minutes_between(range_start, range_end) <= 0 {
        return Err(EngineError::InvalidInput(
            "time range must be greater than zero".into(),
        ));
    }
    Ok(Span::new(range_start, range_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_roundtrip() {
        let ms = parse_utc_iso("2026-02-20T10:00:00.000Z").unwrap();
        assert_eq!(to_iso(ms), "2026-02-20T10:00:00.000Z");
    }

    #[test]
    fn parse_accepts_offsets() {
        let zulu = parse_utc_iso("2026-02-20T10:00:00Z").unwrap();
        let offset = parse_utc_iso("2026-02-20T12:00:00+02:00").unwrap();
        assert_eq!(zulu, offset);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_utc_iso("not-a-time").is_err());
        assert!(parse_utc_iso("2026-02-30T10:00:00Z").is_err());
    }

    #[test]
    fn slot_alignment() {
        let aligned = parse_utc_iso("2026-02-20T10:15:00Z").unwrap();
        let seconds = parse_utc_iso("2026-02-20T10:15:30Z").unwrap();
        let off_grid = parse_utc_iso("2026-02-20T10:20:00Z").unwrap();
        assert!(is_slot_aligned(aligned));
        assert!(!is_slot_aligned(seconds));
        assert!(!is_slot_aligned(off_grid));
    }

    #[test]
    fn timeline_half_open() {
        let start = parse_utc_iso("2026-02-20T10:00:00Z").unwrap();
        let end = parse_utc_iso("2026-02-20T11:00:00Z").unwrap();
        let timeline = build_timeline(start, end);
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline[0], start);
        assert_eq!(timeline[3], add_minutes(start, 45));
        // end itself excluded
        assert!(!timeline.contains(&end));
    }

    #[test]
    fn timeline_empty_on_inverted_range() {
        assert!(build_timeline(900_000, 900_000).is_empty());
        assert!(build_timeline(900_000, 0).is_empty());
    }

    #[test]
    fn normalize_widens_outward() {
        let start = parse_utc_iso("2026-02-20T10:07:00Z").unwrap();
        let end = parse_utc_iso("2026-02-20T11:02:00Z").unwrap();
        let (s, e) = normalize_to_slot_boundaries(start, end);
        assert_eq!(to_iso(s), "2026-02-20T10:00:00.000Z");
        assert_eq!(to_iso(e), "2026-02-20T11:15:00.000Z");
    }

    #[test]
    fn normalize_keeps_aligned_range() {
        let start = parse_utc_iso("2026-02-20T10:00:00Z").unwrap();
        let end = parse_utc_iso("2026-02-20T12:00:00Z").unwrap();
        assert_eq!(normalize_to_slot_boundaries(start, end), (start, end));
    }

    #[test]
    fn range_from_date_and_time() {
        let span =
            build_utc_range_from_date_and_time("2026-02-20", "2026-02-20", "10:00", "12:00")
                .unwrap();
        assert_eq!(span.duration_minutes(), 120);
        assert_eq!(to_iso(span.start), "2026-02-20T10:00:00.000Z");
    }

    #[test]
    fn range_rejects_zero_span() {
        let result =
            build_utc_range_from_date_and_time("2026-02-20", "2026-02-20", "10:00", "10:00");
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn range_rejects_malformed_date() {
        let result =
            build_utc_range_from_date_and_time("20-02-2026", "2026-02-20", "10:00", "12:00");
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }
}
