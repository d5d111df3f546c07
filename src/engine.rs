use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method, StatusCode, Uri};
use tokio::io::AsyncWrite;
use tokio::time::timeout_at;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use crate::Result;
use crate::body::{build_http_request, copy_body_limited};
use crate::context::{CallContext, Interrupted, deadline_after};
use crate::error::{Error, TransportErrorKind};
use crate::extensions::{Clock, SystemClock};
use crate::observe::{AttemptContext, Observer};
use crate::request::{BodySink, CallRequest};
use crate::response::{CallResponse, ResponseParts};
use crate::retry::{
    DelaySource, RetryDecision, effective_backoff, is_retryable_status, max_attempts,
    status_retry_delay,
};
use crate::timing::{TimingCollector, TimingHooks};
use crate::tls::TlsRootStore;
use crate::transport::{HyperTransport, Transport, TransportOptions};
use crate::util::{
    append_query_pairs, parse_header_pair, parse_header_value, parse_query_pair,
    redact_url_for_logs, resolve_url, validate_base_url,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLIENT_NAME: &str = "callx";

pub struct CallEngineBuilder {
    base_url: String,
    token: String,
    client_name: String,
    request_timeout: Duration,
    max_body_bytes: Option<u64>,
    transport_options: TransportOptions,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn Observer>>,
}

impl CallEngineBuilder {
    pub(crate) fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: None,
            transport_options: TransportOptions::default(),
            transport: None,
            clock: Arc::new(SystemClock),
            observer: None,
        }
    }

    /// Name sent in the `user-agent` header as `<name>/<version>`.
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Per-attempt timeout used when a request does not set its own.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = Some(max_body_bytes);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.transport_options = self.transport_options.with_connect_timeout(connect_timeout);
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.transport_options = self
            .transport_options
            .with_pool_idle_timeout(pool_idle_timeout);
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.transport_options = self
            .transport_options
            .with_pool_max_idle_per_host(pool_max_idle_per_host);
        self
    }

    pub fn tls_root_store(mut self, tls_root_store: TlsRootStore) -> Self {
        self.transport_options = self.transport_options.with_tls_root_store(tls_root_store);
        self
    }

    /// Replaces the hyper transport. Connection and TLS settings are ignored
    /// when a custom transport is installed.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn try_build(self) -> Result<CallEngine> {
        validate_base_url(&self.base_url)?;

        let mut authorization = parse_header_value(
            AUTHORIZATION.as_str(),
            &format!("Bearer {}", self.token),
        )
        .map_err(|_| Error::usage("api token contains characters not allowed in a header"))?;
        authorization.set_sensitive(true);

        let user_agent = format!("{}/{}", self.client_name, env!("CARGO_PKG_VERSION"));
        let user_agent = parse_header_value(USER_AGENT.as_str(), &user_agent)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::try_new(self.transport_options)?),
        };

        Ok(CallEngine {
            base_url: self.base_url,
            authorization,
            user_agent,
            client_name: self.client_name,
            request_timeout: self.request_timeout,
            max_body_bytes: self.max_body_bytes,
            transport,
            clock: self.clock,
            observer: self.observer,
        })
    }

    #[track_caller]
    pub fn build(self) -> CallEngine {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build callx engine: {error}; use try_build() to handle configuration errors")
        })
    }
}

/// Executes [`CallRequest`]s against one API base URL.
///
/// Cloning is cheap and clones share the connection pool, so one engine can
/// serve many concurrent calls.
#[derive(Clone)]
pub struct CallEngine {
    base_url: String,
    authorization: HeaderValue,
    user_agent: HeaderValue,
    client_name: String,
    request_timeout: Duration,
    max_body_bytes: Option<u64>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn Observer>>,
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CallEngine")
            .field("base_url", &self.base_url)
            .field("client_name", &self.client_name)
            .field("request_timeout", &self.request_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

/// Everything an attempt needs, validated once before the first dispatch.
struct CallPlan {
    method: Method,
    url: Url,
    uri: Uri,
    redacted_url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Duration,
    max_body_bytes: Option<u64>,
    backoff: Duration,
    max_attempts: usize,
    timing: bool,
}

struct RetryPlan {
    delay: Duration,
    delay_source: DelaySource,
    status: Option<StatusCode>,
    transport_error_kind: Option<TransportErrorKind>,
}

struct AttemptFailure {
    error: Error,
    retry: Option<RetryPlan>,
}

impl AttemptFailure {
    fn terminal(error: Error) -> Self {
        Self { error, retry: None }
    }

    fn transport(error: Error, kind: TransportErrorKind, backoff: Duration) -> Self {
        Self {
            error,
            retry: Some(RetryPlan {
                delay: backoff,
                delay_source: DelaySource::Backoff,
                status: None,
                transport_error_kind: Some(kind),
            }),
        }
    }
}

fn interrupted_error(plan: &CallPlan, interrupted: Interrupted) -> Error {
    let kind = match interrupted {
        Interrupted::Canceled => TransportErrorKind::Canceled,
        Interrupted::DeadlineExceeded => TransportErrorKind::Timeout,
    };
    Error::transport(kind, &plan.method, &plan.redacted_url, interrupted)
}

impl CallEngine {
    pub fn builder(base_url: impl Into<String>, token: impl Into<String>) -> CallEngineBuilder {
        CallEngineBuilder::new(base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs `request` to completion, retrying retriable failures as the
    /// request allows. `context` bounds the whole call, backoff included.
    pub async fn execute(
        &self,
        context: &CallContext,
        mut request: CallRequest,
    ) -> Result<CallResponse> {
        let plan = self.plan(&request)?;
        let mut sink = request.take_sink();
        let mut attempt = 1_usize;

        loop {
            let attempt_context = AttemptContext::new(
                plan.method.clone(),
                plan.redacted_url.clone(),
                attempt,
                plan.max_attempts,
            );
            let span = info_span!(
                "callx.attempt",
                method = %plan.method,
                url = %plan.redacted_url,
                attempt = attempt,
                max_attempts = plan.max_attempts
            );
            if let Some(observer) = &self.observer {
                observer.on_attempt_start(&attempt_context);
            }

            let failure = match self
                .run_attempt(context, &plan, sink.as_mut())
                .instrument(span.clone())
                .await
            {
                Ok(response) => {
                    self.finish(&attempt_context, None);
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            let retry = match failure.retry {
                Some(retry) if attempt < plan.max_attempts => retry,
                _ => {
                    self.finish(&attempt_context, Some(&failure.error));
                    return Err(failure.error);
                }
            };

            let decision = RetryDecision {
                attempt,
                max_attempts: plan.max_attempts,
                method: plan.method.clone(),
                url: plan.redacted_url.clone(),
                status: retry.status,
                transport_error_kind: retry.transport_error_kind,
                delay: retry.delay,
                delay_source: retry.delay_source,
            };
            span.in_scope(|| {
                warn!(
                    delay_ms = retry.delay.as_millis() as u64,
                    error = %failure.error,
                    "retrying request"
                );
            });
            if let Some(observer) = &self.observer {
                observer.on_retry_scheduled(&attempt_context, &decision);
            }

            if let Err(interrupted) = context.sleep(retry.delay).await {
                let error = interrupted_error(&plan, interrupted);
                self.finish(&attempt_context, Some(&error));
                return Err(error);
            }
            attempt += 1;
        }
    }

    fn finish(&self, context: &AttemptContext, error: Option<&Error>) {
        if let Some(observer) = &self.observer {
            observer.on_call_finished(context, error);
        }
    }

    fn plan(&self, request: &CallRequest) -> Result<CallPlan> {
        let method = request.method().clone();
        let mut url = resolve_url(&self.base_url, request.path())?;
        let query_pairs = request
            .query_entries()
            .iter()
            .map(|raw| parse_query_pair(raw))
            .collect::<Result<Vec<_>>>()?;
        append_query_pairs(&mut url, &query_pairs);
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|source| Error::usage(format!("invalid request url {url}: {source}")))?;
        let redacted_url = redact_url_for_logs(url.as_str());

        let caller_headers = request
            .header_entries()
            .iter()
            .map(|raw| parse_header_pair(raw))
            .collect::<Result<Vec<_>>>()?;
        if let Some((name, _)) = caller_headers
            .iter()
            .find(|(name, _)| name == crate::AUTH_HEADER)
        {
            return Err(Error::usage(format!(
                "header {name} is reserved and set from the api token"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.authorization.clone());
        // A caller content-type replaces the one derived from the body.
        let caller_content_type = caller_headers.iter().any(|(name, _)| name == CONTENT_TYPE);
        if !caller_content_type
            && request.body_bytes().is_some()
            && let Some(content_type) = request.content_type_value()
        {
            headers.insert(
                CONTENT_TYPE,
                parse_header_value(CONTENT_TYPE.as_str(), content_type)?,
            );
        }
        for (name, value) in caller_headers {
            headers.append(name, value);
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }

        Ok(CallPlan {
            method,
            url,
            uri,
            redacted_url,
            headers,
            body: request.body_bytes().cloned(),
            timeout: request.timeout_value().unwrap_or(self.request_timeout),
            max_body_bytes: request.max_body_bytes_value().or(self.max_body_bytes),
            backoff: effective_backoff(request.retry_backoff_value()),
            max_attempts: max_attempts(request.retry_count()),
            timing: request.timing_enabled(),
        })
    }

    async fn run_attempt(
        &self,
        context: &CallContext,
        plan: &CallPlan,
        sink: Option<&mut BodySink>,
    ) -> std::result::Result<CallResponse, AttemptFailure> {
        if let Some(interrupted) = context.interruption() {
            return Err(AttemptFailure::terminal(interrupted_error(plan, interrupted)));
        }
        let Some(attempt_timeout) = context.attempt_timeout(plan.timeout) else {
            return Err(AttemptFailure::terminal(interrupted_error(
                plan,
                Interrupted::DeadlineExceeded,
            )));
        };
        let deadline = deadline_after(attempt_timeout);

        let collector = plan.timing.then(|| Arc::new(TimingCollector::new()));
        let hooks = collector
            .clone()
            .map(|collector| collector as Arc<dyn TimingHooks>);
        let request = build_http_request(
            plan.method.clone(),
            plan.uri.clone(),
            &plan.headers,
            plan.body.clone(),
        )
        .map_err(AttemptFailure::terminal)?;

        debug!("sending request");
        let dispatched = tokio::select! {
            biased;
            interrupted = context.interrupted() => {
                return Err(AttemptFailure::terminal(interrupted_error(plan, interrupted)));
            }
            dispatched = timeout_at(deadline, self.transport.send(request, hooks)) => dispatched,
        };
        let response = match dispatched {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                let kind = source.kind();
                let error = Error::transport(kind, &plan.method, &plan.redacted_url, source.into_source());
                if !error.is_retriable() {
                    return Err(AttemptFailure::terminal(error));
                }
                return Err(AttemptFailure::transport(error, kind, plan.backoff));
            }
            Err(_) => {
                let error = Error::transport(
                    TransportErrorKind::Timeout,
                    &plan.method,
                    &plan.redacted_url,
                    format!("no response within {}ms", attempt_timeout.as_millis()),
                );
                return Err(AttemptFailure::transport(
                    error,
                    TransportErrorKind::Timeout,
                    plan.backoff,
                ));
            }
        };

        let (parts, mut body) = response.into_parts();
        let status = parts.status;
        let streamed = status.is_success() && sink.is_some();
        let mut buffer = Vec::new();
        let destination: &mut (dyn AsyncWrite + Send + Unpin) = match sink {
            Some(sink) if status.is_success() => &mut **sink,
            _ => &mut buffer,
        };

        let read = tokio::select! {
            biased;
            interrupted = context.interrupted() => {
                return Err(AttemptFailure::terminal(interrupted_error(plan, interrupted)));
            }
            read = timeout_at(deadline, copy_body_limited(&mut body, destination, plan.max_body_bytes)) => read,
        };
        let read = match read {
            Ok(Ok(read)) => read,
            Ok(Err(source)) => {
                return Err(AttemptFailure::terminal(Error::transport(
                    TransportErrorKind::Body,
                    &plan.method,
                    &plan.redacted_url,
                    source.into_source(),
                )));
            }
            Err(_) => {
                return Err(AttemptFailure::terminal(Error::transport(
                    TransportErrorKind::Timeout,
                    &plan.method,
                    &plan.redacted_url,
                    format!(
                        "response body not read within {}ms",
                        attempt_timeout.as_millis()
                    ),
                )));
            }
        };
        let timing = collector.map(|collector| collector.finish(Instant::now()));

        debug!(
            status = status.as_u16(),
            bytes = read.bytes,
            truncated = read.truncated,
            streamed,
            "response received"
        );

        if !status.is_success() {
            let body = String::from_utf8_lossy(&buffer).into_owned();
            let error = Error::status(status, &plan.method, &plan.redacted_url, &parts.headers, body);
            if !is_retryable_status(status) {
                return Err(AttemptFailure::terminal(error));
            }
            let (delay, delay_source) =
                status_retry_delay(self.clock.as_ref(), status, &parts.headers, plan.backoff);
            return Err(AttemptFailure {
                error,
                retry: Some(RetryPlan {
                    delay,
                    delay_source,
                    status: Some(status),
                    transport_error_kind: None,
                }),
            });
        }

        Ok(CallResponse::new(
            plan.method.clone(),
            plan.url.to_string(),
            ResponseParts {
                status,
                headers: parts.headers,
                body: Bytes::from(buffer),
                bytes: read.bytes,
                truncated: read.truncated,
                streamed,
                timing,
            },
        ))
    }
}
