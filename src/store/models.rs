//! Measurement record model and its on-disk line format.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Latency sentinel for a probe that did not complete within its timeout.
pub const LOSS_LATENCY: i64 = -1;

/// Timestamp format used in log lines (local wall-clock, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single persisted reachability measurement.
///
/// `latency_millis` is either a non-negative round-trip time or
/// [`LOSS_LATENCY`]; no other negative value is ever valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    pub timestamp: NaiveDateTime,
    pub ip_address: String,
    pub latency_millis: i64,
}

/// Line parse error types.
#[derive(Error, Debug)]
pub enum ParseRecordError {
    #[error("expected 3 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("invalid latency: {0}")]
    Latency(String),
}

impl PingRecord {
    /// Create a record stamped with the current local wall-clock time.
    pub fn now(ip_address: &str, latency_millis: i64) -> Self {
        let ts = Local::now().naive_local();
        Self {
            // Second precision matches the line format, so a record
            // round-trips through storage unchanged.
            timestamp: ts.with_nanosecond(0).unwrap_or(ts),
            ip_address: ip_address.to_string(),
            latency_millis,
        }
    }

    pub fn is_loss(&self) -> bool {
        self.latency_millis == LOSS_LATENCY
    }

    /// Serialize to the log line format: `timestamp,ip,latency`.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.ip_address,
            self.latency_millis
        )
    }

    /// Parse a log line produced by [`PingRecord::to_line`].
    pub fn parse_line(line: &str) -> Result<Self, ParseRecordError> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 3 {
            return Err(ParseRecordError::FieldCount(fields.len()));
        }

        let timestamp = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|_| ParseRecordError::Timestamp(fields[0].to_string()))?;

        let latency_millis: i64 = fields[2]
            .parse()
            .map_err(|_| ParseRecordError::Latency(fields[2].to_string()))?;

        if latency_millis < LOSS_LATENCY {
            return Err(ParseRecordError::Latency(fields[2].to_string()));
        }

        Ok(Self {
            timestamp,
            ip_address: fields[1].to_string(),
            latency_millis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn test_line_round_trip() {
        let record = PingRecord {
            timestamp: ts("2024-05-01 13:37:09"),
            ip_address: "192.168.1.1".to_string(),
            latency_millis: 23,
        };

        let line = record.to_line();
        assert_eq!(line, "2024-05-01 13:37:09,192.168.1.1,23");
        assert_eq!(PingRecord::parse_line(&line).unwrap(), record);
    }

    #[test]
    fn test_loss_marker_round_trip() {
        let record = PingRecord {
            timestamp: ts("2024-05-01 13:37:10"),
            ip_address: "8.8.8.8".to_string(),
            latency_millis: LOSS_LATENCY,
        };

        assert!(record.is_loss());
        let parsed = PingRecord::parse_line(&record.to_line()).unwrap();
        assert!(parsed.is_loss());
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_now_has_second_precision() {
        let record = PingRecord::now("10.0.0.1", 5);
        assert_eq!(record.timestamp.nanosecond(), 0);
        assert_eq!(
            PingRecord::parse_line(&record.to_line()).unwrap(),
            record
        );
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!(
            PingRecord::parse_line("2024-05-01 13:37:09,1.1.1.1"),
            Err(ParseRecordError::FieldCount(2))
        ));
        assert!(matches!(
            PingRecord::parse_line("not a date,1.1.1.1,10"),
            Err(ParseRecordError::Timestamp(_))
        ));
        assert!(matches!(
            PingRecord::parse_line("2024-05-01 13:37:09,1.1.1.1,fast"),
            Err(ParseRecordError::Latency(_))
        ));
        // -1 is the only valid negative latency
        assert!(matches!(
            PingRecord::parse_line("2024-05-01 13:37:09,1.1.1.1,-2"),
            Err(ParseRecordError::Latency(_))
        ));
    }

    #[test]
    fn test_parse_accepts_whole_day_boundaries() {
        let midnight = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let parsed = PingRecord::parse_line("2024-05-01 00:00:00,1.1.1.1,0").unwrap();
        assert_eq!(parsed.timestamp, midnight);
        assert_eq!(parsed.latency_millis, 0);
        assert!(!parsed.is_loss());
    }
}
