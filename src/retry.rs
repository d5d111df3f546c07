use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};

use crate::error::TransportErrorKind;
use crate::extensions::Clock;
use crate::util::parse_retry_after;

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Where a scheduled retry delay came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelaySource {
    Backoff,
    RetryAfter,
}

#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub attempt: usize,
    pub max_attempts: usize,
    pub method: Method,
    pub url: String,
    pub status: Option<StatusCode>,
    pub transport_error_kind: Option<TransportErrorKind>,
    pub delay: Duration,
    pub delay_source: DelaySource,
}

/// Backoff floor for a call. Unset or zero falls back to 250ms.
pub(crate) fn effective_backoff(retry_backoff: Option<Duration>) -> Duration {
    match retry_backoff {
        Some(backoff) if !backoff.is_zero() => backoff,
        _ => DEFAULT_RETRY_BACKOFF,
    }
}

pub(crate) fn max_attempts(retries: usize) -> usize {
    retries.saturating_add(1)
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500
}

/// Delay before retrying after `status`. Only 429 honors `Retry-After`;
/// everything else waits the floor.
pub(crate) fn status_retry_delay(
    clock: &dyn Clock,
    status: StatusCode,
    headers: &HeaderMap,
    floor: Duration,
) -> (Duration, DelaySource) {
    if status != StatusCode::TOO_MANY_REQUESTS {
        return (floor, DelaySource::Backoff);
    }
    match parse_retry_after(headers, clock.now_system()) {
        Some(delay) => (delay, DelaySource::RetryAfter),
        None => (floor, DelaySource::Backoff),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use http::header::{HeaderValue, RETRY_AFTER};
    use http::{HeaderMap, StatusCode};

    use super::{DEFAULT_RETRY_BACKOFF, DelaySource, effective_backoff, max_attempts, status_retry_delay};
    use crate::extensions::FixedClock;

    fn retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(value).expect("valid header value"),
        );
        headers
    }

    #[test]
    fn backoff_floor_defaults_when_unset_or_zero() {
        assert_eq!(effective_backoff(None), DEFAULT_RETRY_BACKOFF);
        assert_eq!(effective_backoff(Some(Duration::ZERO)), DEFAULT_RETRY_BACKOFF);
        assert_eq!(
            effective_backoff(Some(Duration::from_millis(40))),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn attempts_are_retries_plus_one() {
        assert_eq!(max_attempts(0), 1);
        assert_eq!(max_attempts(3), 4);
        assert_eq!(max_attempts(usize::MAX), usize::MAX);
    }

    #[test]
    fn too_many_requests_uses_retry_after_seconds() {
        let clock = FixedClock(SystemTime::UNIX_EPOCH);
        let (delay, source) = status_retry_delay(
            &clock,
            StatusCode::TOO_MANY_REQUESTS,
            &retry_after("2"),
            Duration::from_millis(250),
        );
        assert_eq!(delay, Duration::from_secs(2));
        assert_eq!(source, DelaySource::RetryAfter);
    }

    #[test]
    fn past_http_date_waits_zero() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000);
        let past = httpdate::fmt_http_date(now - Duration::from_secs(90));
        let (delay, source) = status_retry_delay(
            &FixedClock(now),
            StatusCode::TOO_MANY_REQUESTS,
            &retry_after(&past),
            Duration::from_millis(250),
        );
        assert_eq!(delay, Duration::ZERO);
        assert_eq!(source, DelaySource::RetryAfter);
    }

    #[test]
    fn future_http_date_waits_until_date() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000);
        let later = httpdate::fmt_http_date(now + Duration::from_secs(45));
        let (delay, _) = status_retry_delay(
            &FixedClock(now),
            StatusCode::TOO_MANY_REQUESTS,
            &retry_after(&later),
            Duration::from_millis(250),
        );
        assert_eq!(delay, Duration::from_secs(45));
    }

    #[test]
    fn unparsable_retry_after_falls_back_to_floor() {
        let (delay, source) = status_retry_delay(
            &FixedClock(SystemTime::UNIX_EPOCH),
            StatusCode::TOO_MANY_REQUESTS,
            &retry_after("soon"),
            Duration::from_millis(300),
        );
        assert_eq!(delay, Duration::from_millis(300));
        assert_eq!(source, DelaySource::Backoff);
    }

    #[test]
    fn server_errors_ignore_retry_after() {
        let (delay, source) = status_retry_delay(
            &FixedClock(SystemTime::UNIX_EPOCH),
            StatusCode::SERVICE_UNAVAILABLE,
            &retry_after("30"),
            Duration::from_millis(250),
        );
        assert_eq!(delay, Duration::from_millis(250));
        assert_eq!(source, DelaySource::Backoff);
    }
}
