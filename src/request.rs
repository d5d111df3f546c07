use std::time::Duration;

use bytes::Bytes;
use http::Method;
use serde::Serialize;
use tokio::io::AsyncWrite;

use crate::Result;
use crate::error::Error;

/// External destination for a streamed success body.
pub type BodySink = Box<dyn AsyncWrite + Send + Unpin>;

/// Declarative description of one call.
///
/// Query and header entries are kept as the raw `key=value` / `key:value`
/// strings supplied by the caller; they are parsed and validated once, before
/// the first attempt, so a malformed entry never reaches the network.
pub struct CallRequest {
    method: Method,
    path: String,
    query: Vec<String>,
    headers: Vec<String>,
    body: Option<Bytes>,
    content_type: Option<String>,
    timeout: Option<Duration>,
    retries: usize,
    retry_backoff: Option<Duration>,
    sink: Option<BodySink>,
    max_body_bytes: Option<u64>,
    timing: bool,
}

impl std::fmt::Debug for CallRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CallRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("content_type", &self.content_type)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("streaming", &self.sink.is_some())
            .field("max_body_bytes", &self.max_body_bytes)
            .field("timing", &self.timing)
            .finish()
    }
}

impl CallRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            content_type: None,
            timeout: None,
            retries: 0,
            retry_backoff: None,
            sink: None,
            max_body_bytes: None,
            timing: false,
        }
    }

    /// Builds a request from a textual verb such as `"get"` or `"PATCH"`.
    pub fn try_new(method: &str, path: impl Into<String>) -> Result<Self> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::usage(format!("invalid http method {method:?}")))?;
        Ok(Self::new(method, path))
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Adds one `key=value` query entry.
    pub fn query(mut self, pair: impl Into<String>) -> Self {
        self.query.push(pair.into());
        self
    }

    pub fn queries<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.extend(pairs.into_iter().map(Into::into));
        self
    }

    /// Adds one `key:value` header entry.
    pub fn header(mut self, pair: impl Into<String>) -> Self {
        self.headers.push(pair.into());
        self
    }

    pub fn headers<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(pairs.into_iter().map(Into::into));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T>(mut self, value: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)
            .map_err(|source| Error::usage(format!("failed to serialize request json: {source}")))?;
        self.body = Some(Bytes::from(body));
        if self.content_type.is_none() {
            self.content_type = Some("application/json".to_owned());
        }
        Ok(self)
    }

    /// Content type sent only when a body is present.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Per-attempt timeout. Falls back to the engine default when unset.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of extra attempts after the first one.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = Some(retry_backoff);
        self
    }

    /// Streams a success body into `sink` instead of buffering it.
    pub fn sink<W>(mut self, sink: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn boxed_sink(mut self, sink: BodySink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = Some(max_body_bytes);
        self
    }

    pub fn timing(mut self, enabled: bool) -> Self {
        self.timing = enabled;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_entries(&self) -> &[String] {
        &self.query
    }

    pub fn header_entries(&self) -> &[String] {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn content_type_value(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry_count(&self) -> usize {
        self.retries
    }

    pub fn retry_backoff_value(&self) -> Option<Duration> {
        self.retry_backoff
    }

    pub fn max_body_bytes_value(&self) -> Option<u64> {
        self.max_body_bytes
    }

    pub fn timing_enabled(&self) -> bool {
        self.timing
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn take_sink(&mut self) -> Option<BodySink> {
        self.sink.take()
    }
}
