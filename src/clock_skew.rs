use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;
use http::HeaderMap;
use http::header::DATE;
use tracing::warn;

use crate::error::ServiceError;

const COMPACT_ISO8601_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Seconds the local clock runs ahead of the service clock.
///
/// Clones share the same cell. Writers race; the last write wins.
#[derive(Clone, Debug, Default)]
pub struct ClockOffset {
    seconds: Arc<AtomicI32>,
}

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seconds(seconds: i32) -> Self {
        Self {
            seconds: Arc::new(AtomicI32::new(seconds)),
        }
    }

    pub fn get(&self) -> i32 {
        self.seconds.load(Ordering::Relaxed)
    }

    pub fn set(&self, seconds: i32) {
        self.seconds.store(seconds, Ordering::Relaxed);
    }

    /// Recomputes the offset from a clock-skew failure. Returns the new offset,
    /// or 0 with the stored value untouched when no server time can be parsed.
    pub fn correct_from(&self, headers: &HeaderMap, error: &ServiceError, now: SystemTime) -> i32 {
        match compute_offset_seconds(headers, &error.message, now) {
            Some(offset) => {
                self.set(offset);
                offset
            }
            None => 0,
        }
    }
}

pub fn is_clock_skew_error(error: &ServiceError) -> bool {
    error.is_clock_skew()
}

/// `round((now - server) / 1000)` from the `Date` header, or from the server
/// timestamp embedded in the error message when the header is absent.
pub fn compute_offset_seconds(headers: &HeaderMap, message: &str, now: SystemTime) -> Option<i32> {
    let server_millis = match headers.get(DATE) {
        Some(value) => {
            let text = value.to_str().ok();
            match text.and_then(|text| httpdate::parse_http_date(text).ok()) {
                Some(server_time) => system_time_millis(server_time),
                None => {
                    warn!(date = ?value, "unable to parse clock skew offset from Date header");
                    return None;
                }
            }
        }
        None => {
            let Some(server_date) = server_date_from_message(message) else {
                warn!(error_message = message, "unable to parse clock skew offset from error message");
                return None;
            };
            match NaiveDateTime::parse_from_str(server_date, COMPACT_ISO8601_FORMAT) {
                Ok(parsed) => i128::from(parsed.and_utc().timestamp_millis()),
                Err(source) => {
                    warn!(server_date, %source, "unable to parse clock skew offset from error message");
                    return None;
                }
            }
        }
    };

    let diff_millis = system_time_millis(now) - server_millis;
    let seconds = (diff_millis as f64 / 1000.0).round();
    Some(seconds.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)
}

/// Text between `(` and the first ` + ` (or ` - `), e.g.
/// `"... (20130401T040113Z - 15 min.)"` yields `20130401T040113Z`.
fn server_date_from_message(message: &str) -> Option<&str> {
    let start = message.find('(').map_or(0, |position| position + 1);
    let end = message
        .find(" + ")
        .or_else(|| message.find(" - "))?;
    message.get(start..end)
}

fn system_time_millis(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i128,
        Err(before_epoch) => -(before_epoch.duration().as_millis() as i128),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use http::HeaderMap;
    use http::header::{DATE, HeaderValue};

    use super::{ClockOffset, compute_offset_seconds, server_date_from_message};
    use crate::error::ServiceError;

    fn skew_error(message: &str) -> ServiceError {
        ServiceError::new(403, "RequestTimeTooSkewed", message)
    }

    #[test]
    fn offset_from_date_header_is_rounded() {
        let server = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut headers = HeaderMap::new();
        headers.insert(
            DATE,
            HeaderValue::from_str(&httpdate::fmt_http_date(server)).expect("valid date"),
        );
        let now = server + Duration::from_millis(300_600);
        assert_eq!(compute_offset_seconds(&headers, "", now), Some(301));

        let behind = server - Duration::from_millis(59_400);
        assert_eq!(compute_offset_seconds(&headers, "", behind), Some(-59));
    }

    #[test]
    fn offset_falls_back_to_error_message() {
        let message =
            "Signature expired: 20130401T030113Z is now earlier than 20130401T034613Z (20130401T040113Z - 15 min.)";
        assert_eq!(server_date_from_message(message), Some("20130401T040113Z"));

        let server = UNIX_EPOCH + Duration::from_secs(1_364_788_873);
        let now = server + Duration::from_secs(120);
        assert_eq!(
            compute_offset_seconds(&HeaderMap::new(), message, now),
            Some(120)
        );
    }

    #[test]
    fn unparseable_data_leaves_offset_unchanged() {
        let offset = ClockOffset::with_seconds(42);
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("not a date"));
        let corrected = offset.correct_from(&headers, &skew_error("expired"), SystemTime::now());
        assert_eq!(corrected, 0);
        assert_eq!(offset.get(), 42);

        let corrected = offset.correct_from(
            &HeaderMap::new(),
            &skew_error("no timestamp here"),
            SystemTime::now(),
        );
        assert_eq!(corrected, 0);
        assert_eq!(offset.get(), 42);
    }

    #[test]
    fn clones_share_the_offset_cell() {
        let offset = ClockOffset::new();
        let shared = offset.clone();
        shared.set(-7);
        assert_eq!(offset.get(), -7);
    }
}
