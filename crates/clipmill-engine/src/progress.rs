//! Typed parsing of the engine's `key=value` progress stream.
//!
//! The stream is line-oriented; each recognized key maps to a
//! [`ProgressEvent`] variant and everything else is [`ProgressEvent::Unknown`].
//! Delivery order is whatever order the engine emits; no reordering or
//! deduplication happens here.

/// One parsed progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Elapsed output time. The engine reports `out_time_ms` in microseconds.
    OutTime {
        /// Microseconds of output produced so far.
        us: u64,
    },
    /// Cumulative output size in bytes.
    TotalSize {
        /// Bytes written so far.
        bytes: u64,
    },
    /// Any unrecognized key, or a recognized key with an unparsable value.
    Unknown,
}

/// Parse a single `key=value` progress line.
pub fn parse_progress_line(line: &str) -> ProgressEvent {
    if let Some(val) = line.strip_prefix("out_time_ms=") {
        match val.trim().parse::<u64>() {
            Ok(us) => ProgressEvent::OutTime { us },
            // ffmpeg emits a sentinel negative value before the first frame.
            Err(_) => ProgressEvent::Unknown,
        }
    } else if let Some(val) = line.strip_prefix("total_size=") {
        match val.trim().parse::<u64>() {
            Ok(bytes) => ProgressEvent::TotalSize { bytes },
            Err(_) => ProgressEvent::Unknown,
        }
    } else {
        ProgressEvent::Unknown
    }
}

/// Percentage of a known source duration covered by `out_time_us`.
///
/// Rounded to the nearest integer and capped at 99: 100 is reserved for the
/// terminal success transition, after the output buffer actually exists.
pub fn percent_from_out_time(out_time_us: u64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 {
        return 0;
    }
    let pct = (out_time_us as f64 / (duration_secs * 1_000_000.0) * 100.0).round();
    pct.clamp(0.0, 99.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_out_time() {
        assert_eq!(
            parse_progress_line("out_time_ms=500000"),
            ProgressEvent::OutTime { us: 500_000 }
        );
    }

    #[test]
    fn parses_total_size() {
        assert_eq!(
            parse_progress_line("total_size=1048576"),
            ProgressEvent::TotalSize { bytes: 1_048_576 }
        );
    }

    #[test]
    fn ignores_other_keys() {
        for line in [
            "frame=42",
            "fps=30.01",
            "bitrate=1024.2kbits/s",
            "speed=2.5x",
            "progress=continue",
            "",
            "garbage",
        ] {
            assert_eq!(parse_progress_line(line), ProgressEvent::Unknown);
        }
    }

    #[test]
    fn negative_sentinel_is_unknown() {
        assert_eq!(
            parse_progress_line("out_time_ms=-9223372036854775807"),
            ProgressEvent::Unknown
        );
    }

    #[test]
    fn tolerates_whitespace_in_value() {
        assert_eq!(
            parse_progress_line("total_size= 2048"),
            ProgressEvent::TotalSize { bytes: 2048 }
        );
    }

    #[test]
    fn halfway_through_one_second() {
        // 500000 us of a 1.0 s source is exactly 50%.
        assert_eq!(percent_from_out_time(500_000, 1.0), 50);
    }

    #[test]
    fn rounds_to_nearest() {
        // 0.333... s of a 1.0 s source rounds to 33.
        assert_eq!(percent_from_out_time(333_333, 1.0), 33);
        // 0.335 s rounds up to 34.
        assert_eq!(percent_from_out_time(335_000, 1.0), 34);
    }

    #[test]
    fn caps_at_ninety_nine() {
        assert_eq!(percent_from_out_time(1_000_000, 1.0), 99);
        assert_eq!(percent_from_out_time(5_000_000, 1.0), 99);
    }

    #[test]
    fn zero_duration_yields_zero() {
        assert_eq!(percent_from_out_time(500_000, 0.0), 0);
        assert_eq!(percent_from_out_time(500_000, -1.0), 0);
    }

    #[test]
    fn zero_out_time_is_zero() {
        assert_eq!(percent_from_out_time(0, 10.0), 0);
    }
}
