//! `callx` executes one declarative HTTP call against an API: it resolves the
//! URL, retries transient failures with a fixed backoff floor (honoring
//! `Retry-After` on 429), streams or buffers the body under an optional cap,
//! and can report per-phase wire timing.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use callx::prelude::{CallContext, CallEngine, CallRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = CallEngine::builder("https://api.example.com", "secret-token")
//!         .client_name("my-cli")
//!         .request_timeout(Duration::from_secs(10))
//!         .try_build()?;
//!
//!     let request = CallRequest::get("/v1/items")
//!         .query("limit=20")
//!         .header("accept: application/json")
//!         .retries(2)
//!         .timing(true);
//!
//!     let context = CallContext::with_timeout(Duration::from_secs(30));
//!     let response = engine.execute(&context, request).await?;
//!     println!("{} {}", response.status(), response.text_lossy());
//!     if let Some(timing) = response.timing() {
//!         println!("total={}ms", timing.total_ms);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Kinds
//!
//! Every failure maps to one of three [`ErrorKind`]s, each with a stable exit
//! code: usage (malformed input, rejected before any network I/O), auth (401
//! and 403) and network (everything else, including other HTTP statuses).

use http::HeaderName;

/// Header carrying the bearer token. Callers may not set it themselves.
pub const AUTH_HEADER: HeaderName = http::header::AUTHORIZATION;

mod body;
mod context;
mod engine;
mod error;
mod extensions;
mod observe;
mod request;
mod response;
mod retry;
mod timing;
mod tls;
mod transport;
mod util;

pub use crate::body::{RequestBody, ResponseBody};
pub use crate::context::{CallContext, Interrupted};
pub use crate::engine::{
    CallEngine, CallEngineBuilder, DEFAULT_CLIENT_NAME, DEFAULT_REQUEST_TIMEOUT,
};
pub use crate::error::{BoxError, Error, ErrorCode, ErrorKind, TransportErrorKind};
pub use crate::extensions::{Clock, FixedClock, SystemClock};
pub use crate::observe::{AttemptContext, Observer};
pub use crate::request::{BodySink, CallRequest};
pub use crate::response::CallResponse;
pub use crate::retry::{DEFAULT_RETRY_BACKOFF, DelaySource, RetryDecision};
pub use crate::timing::{CallTiming, TimingCollector, TimingHooks};
pub use crate::tls::TlsRootStore;
pub use crate::transport::{HyperTransport, Transport, TransportError, TransportOptions};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CallContext, CallEngine, CallEngineBuilder, CallRequest, CallResponse, CallTiming,
        DelaySource, Error, ErrorCode, ErrorKind, Observer, Result, RetryDecision, TlsRootStore,
        TransportErrorKind,
    };
}
