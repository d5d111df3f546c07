use http::Method;

use crate::error::Error;
use crate::retry::RetryDecision;

#[derive(Clone, Debug)]
pub struct AttemptContext {
    method: Method,
    url: String,
    attempt: usize,
    max_attempts: usize,
}

impl AttemptContext {
    pub(crate) fn new(method: Method, url: String, attempt: usize, max_attempts: usize) -> Self {
        Self {
            method,
            url,
            attempt,
            max_attempts,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request url with userinfo, query and fragment removed.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

pub trait Observer: Send + Sync {
    fn on_attempt_start(&self, _context: &AttemptContext) {}

    fn on_retry_scheduled(&self, _context: &AttemptContext, _decision: &RetryDecision) {}

    fn on_call_finished(&self, _context: &AttemptContext, _error: Option<&Error>) {}
}
