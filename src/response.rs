use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::timing::CallTiming;
use crate::util::truncate_body;

/// Successful outcome of a call.
#[derive(Clone, Debug)]
pub struct CallResponse {
    method: Method,
    url: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    bytes: u64,
    truncated: bool,
    streamed: bool,
    timing: Option<CallTiming>,
}

pub(crate) struct ResponseParts {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) bytes: u64,
    pub(crate) truncated: bool,
    pub(crate) streamed: bool,
    pub(crate) timing: Option<CallTiming>,
}

impl CallResponse {
    pub(crate) fn new(method: Method, url: String, parts: ResponseParts) -> Self {
        Self {
            method,
            url,
            status: parts.status,
            headers: parts.headers,
            body: parts.body,
            bytes: parts.bytes,
            truncated: parts.truncated,
            streamed: parts.streamed,
            timing: parts.timing,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Fully resolved request url, including the merged query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Buffered body; empty when the body was streamed to a sink.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Bytes received into the buffer or written to the sink.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_streamed(&self) -> bool {
        self.streamed
    }

    pub fn timing(&self) -> Option<&CallTiming> {
        self.timing.as_ref()
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }
}
