use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::HeaderMap;
use url::Url;

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn invalid_base_url_error(base_url: &str) -> Error {
    Error::usage(format!("invalid base url: {base_url}"))
}

fn is_http_scheme(scheme: &str) -> bool {
    scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
}

pub(crate) fn redact_url_for_logs(url_text: &str) -> String {
    let Ok(mut parsed) = Url::parse(url_text) else {
        return url_text.split('?').next().unwrap_or(url_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), Error> {
    let normalized = base_url.trim();
    if normalized.len() != base_url.len() || normalized.is_empty() {
        return Err(invalid_base_url_error(base_url));
    }

    let parsed = Url::parse(normalized).map_err(|_| invalid_base_url_error(base_url))?;
    if !is_http_scheme(parsed.scheme()) || parsed.host_str().is_none() {
        return Err(invalid_base_url_error(base_url));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid_base_url_error(base_url));
    }
    Ok(())
}

/// Resolves `path` against `base_url`. An absolute http(s) `path` wins over
/// the base; anything else is joined with exactly one `/` in between.
pub(crate) fn resolve_url(base_url: &str, path: &str) -> Result<Url, Error> {
    let url_text = match Url::parse(path) {
        Ok(url) if url.host_str().is_some() => {
            if !is_http_scheme(url.scheme()) {
                return Err(Error::usage(format!("unsupported url scheme: {path}")));
            }
            return Ok(url);
        }
        _ => join_base_path(base_url, path),
    };

    let url = Url::parse(&url_text)
        .map_err(|source| Error::usage(format!("invalid request url {url_text}: {source}")))?;
    if !is_http_scheme(url.scheme()) || url.host_str().is_none() {
        return Err(Error::usage(format!("invalid request url: {url_text}")));
    }
    Ok(url)
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

/// Appends every pair to the query string. Existing values are kept and
/// repeated keys contribute additional values.
pub(crate) fn append_query_pairs(url: &mut Url, query_pairs: &[(String, String)]) {
    if query_pairs.is_empty() {
        return;
    }
    let mut serializer = url.query_pairs_mut();
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
}

fn split_pair<'a>(kind: &str, raw: &'a str, separator: char) -> Result<(&'a str, &'a str), Error> {
    let Some((name, value)) = raw.split_once(separator) else {
        return Err(Error::usage(format!(
            "invalid {kind} {raw:?}: expected key{separator}value"
        )));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::usage(format!("invalid {kind} {raw:?}: empty key")));
    }
    Ok((name, value.trim()))
}

pub(crate) fn parse_query_pair(raw: &str) -> Result<(String, String), Error> {
    let (name, value) = split_pair("query parameter", raw, '=')?;
    Ok((name.to_owned(), value.to_owned()))
}

pub(crate) fn parse_header_pair(raw: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let (name, value) = split_pair("header", raw, ':')?;
    Ok((parse_header_name(name)?, parse_header_value(name, value)?))
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse()
        .map_err(|source| Error::usage(format!("invalid header name {name:?}: {source}")))
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value
        .parse()
        .map_err(|source| Error::usage(format!("invalid header value for {name}: {source}")))
}

/// Reads `Retry-After` as delta-seconds or an HTTP-date. A date in the past
/// yields a zero delay.
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

pub(crate) fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.to_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    truncate_text(&String::from_utf8_lossy(body))
}
