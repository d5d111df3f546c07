//! HTTP dispatch.
//!
//! [`Transport`] is the seam between the executor and the network. The
//! default [`HyperTransport`] drives a `hyper-util` client whose connector
//! stack is decorated so it can fire [`TimingHooks`] at each phase it
//! controls:
//!
//! - `TracedResolver` wraps the getaddrinfo resolver (DNS start/done),
//! - `TcpConnector` wraps `HttpConnector` (connect start/done, TLS start),
//! - `AttemptConnector` wraps the rustls connector (TLS done, connection
//!   acquired) and hands out a `TracedConnection` that observes request
//!   flushes and the first response byte.
//!
//! Hooks reach the connector through a task-local scoped around the attempt.
//! Timed attempts go through a client with pooling disabled, so every
//! connection and every hook belongs to the attempt being measured.

use std::error::Error as StdError;
use std::mem::MaybeUninit;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::{Request, Response, Uri};
use http_body_util::BodyExt;
use hyper::rt::{Read as HyperRead, ReadBuf, ReadBufCursor, Write as HyperWrite};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tower_service::Service;

use crate::body::{RequestBody, ResponseBody};
use crate::error::{BoxError, Error, TransportErrorKind};
use crate::timing::TimingHooks;
use crate::tls::{TlsRootStore, build_tls_config};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

tokio::task_local! {
    static ATTEMPT_HOOKS: Arc<dyn TimingHooks>;
}

fn current_hooks() -> Option<Arc<dyn TimingHooks>> {
    ATTEMPT_HOOKS.try_with(Arc::clone).ok()
}

/// Failure to obtain a response from the network.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

/// Sends one request and resolves once response headers have arrived.
///
/// Implementations must be safe to share between concurrent calls. When
/// `hooks` is present the transport fires whichever lifecycle callbacks it
/// can observe.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: Request<RequestBody>,
        hooks: Option<Arc<dyn TimingHooks>>,
    ) -> BoxFuture<'_, Result<Response<ResponseBody>, TransportError>>;
}

#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub tls_root_store: TlsRootStore,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            tls_root_store: TlsRootStore::default(),
        }
    }
}

impl TransportOptions {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn with_tls_root_store(mut self, tls_root_store: TlsRootStore) -> Self {
        self.tls_root_store = tls_root_store;
        self
    }
}

type HyperClient = Client<AttemptConnector, RequestBody>;

#[derive(Clone)]
pub struct HyperTransport {
    pooled: HyperClient,
    traced: HyperClient,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn try_new(options: TransportOptions) -> Result<Self, Error> {
        let tls_config = build_tls_config(options.tls_root_store)?;

        let mut http = HttpConnector::new_with_resolver(TracedResolver::new());
        http.enforce_http(false);
        http.set_connect_timeout(Some(options.connect_timeout));
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(TcpConnector { inner: http });
        let connector = AttemptConnector { inner: https };

        let pooled = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(options.pool_idle_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build(connector.clone());
        let traced = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);
        Ok(Self { pooled, traced })
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: Request<RequestBody>,
        hooks: Option<Arc<dyn TimingHooks>>,
    ) -> BoxFuture<'_, Result<Response<ResponseBody>, TransportError>> {
        Box::pin(async move {
            let result = match hooks {
                Some(hooks) => ATTEMPT_HOOKS.scope(hooks, self.traced.request(request)).await,
                None => self.pooled.request(request).await,
            };
            let response = result.map_err(|source| {
                TransportError::new(classify_transport_error(&source), source)
            })?;
            Ok(response.map(|body| body.map_err(|source| Box::new(source) as BoxError).boxed_unsync()))
        })
    }
}

fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.to_ascii_lowercase()
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let text = error_chain_text(error);
    if text.contains("timed out") || text.contains("timeout") {
        return TransportErrorKind::Timeout;
    }
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("incomplete message")
    {
        return TransportErrorKind::Body;
    }
    TransportErrorKind::Other
}

fn is_https(uri: &Uri) -> bool {
    uri.scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"))
}

#[derive(Clone)]
pub(crate) struct TracedResolver {
    inner: GaiResolver,
}

impl TracedResolver {
    fn new() -> Self {
        Self {
            inner: GaiResolver::new(),
        }
    }
}

impl Service<Name> for TracedResolver {
    type Response = <GaiResolver as Service<Name>>::Response;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let hooks = current_hooks();
        if let Some(hooks) = &hooks {
            hooks.dns_start();
        }
        let resolving = self.inner.call(name);
        Box::pin(async move {
            let resolved = resolving.await;
            if let Some(hooks) = hooks {
                hooks.dns_done();
                hooks.connect_start();
            }
            resolved
        })
    }
}

#[derive(Clone)]
pub(crate) struct TcpConnector {
    inner: HttpConnector<TracedResolver>,
}

impl Service<Uri> for TcpConnector {
    type Response = <HttpConnector<TracedResolver> as Service<Uri>>::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|error| Box::new(error) as BoxError)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let hooks = current_hooks();
        let tls = is_https(&dst);
        if let Some(hooks) = &hooks {
            hooks.connect_start();
        }
        let connecting = self.inner.call(dst);
        Box::pin(async move {
            let stream = connecting
                .await
                .map_err(|error| Box::new(error) as BoxError)?;
            if let Some(hooks) = hooks {
                hooks.connect_done();
                if tls {
                    hooks.tls_start();
                }
            }
            Ok(stream)
        })
    }
}

type TcpStream = <TcpConnector as Service<Uri>>::Response;

#[derive(Clone)]
pub(crate) struct AttemptConnector {
    inner: HttpsConnector<TcpConnector>,
}

impl Service<Uri> for AttemptConnector {
    type Response = TracedConnection<MaybeHttpsStream<TcpStream>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let Some(hooks) = current_hooks() else {
            let connecting = self.inner.call(dst);
            return Box::pin(async move {
                connecting
                    .await
                    .map(|connection| TracedConnection::new(connection, None))
            });
        };

        let tls = is_https(&dst);
        let connecting = ATTEMPT_HOOKS.sync_scope(Arc::clone(&hooks), || self.inner.call(dst));
        let connecting = ATTEMPT_HOOKS.scope(Arc::clone(&hooks), connecting);
        Box::pin(async move {
            let connection = connecting.await?;
            if tls {
                hooks.tls_done();
            }
            hooks.got_connection();
            Ok(TracedConnection::new(connection, Some(hooks)))
        })
    }
}

pub(crate) struct TracedConnection<T> {
    inner: T,
    hooks: Option<Arc<dyn TimingHooks>>,
    unflushed_write: bool,
    wrote_request: bool,
    first_byte_seen: bool,
}

impl<T> TracedConnection<T> {
    fn new(inner: T, hooks: Option<Arc<dyn TimingHooks>>) -> Self {
        Self {
            inner,
            hooks,
            unflushed_write: false,
            wrote_request: false,
            first_byte_seen: false,
        }
    }

    fn record_write(&mut self, written: &Poll<Result<usize, std::io::Error>>) {
        if matches!(written, Poll::Ready(Ok(count)) if *count > 0) {
            self.unflushed_write = true;
        }
    }
}

impl<T> HyperRead for TracedConnection<T>
where
    T: HyperRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let this = self.get_mut();
        if !this.wrote_request || this.first_byte_seen || this.hooks.is_none() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }

        // Read through a scratch buffer until the first byte arrives, so an
        // EOF or empty read does not count as the response starting.
        let mut scratch = vec![MaybeUninit::<u8>::uninit(); buf.remaining()];
        let mut staged = ReadBuf::uninit(&mut scratch);
        let polled = Pin::new(&mut this.inner).poll_read(cx, staged.unfilled());
        if let Poll::Ready(Ok(())) = polled {
            let filled = staged.filled();
            if !filled.is_empty() {
                this.first_byte_seen = true;
                if let Some(hooks) = &this.hooks {
                    hooks.first_response_byte();
                }
            }
            buf.put_slice(filled);
        }
        polled
    }
}

impl<T> HyperWrite for TracedConnection<T>
where
    T: HyperWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();
        let written = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.record_write(&written);
        written
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        let this = self.get_mut();
        let flushed = Pin::new(&mut this.inner).poll_flush(cx);
        if this.unflushed_write && matches!(flushed, Poll::Ready(Ok(()))) {
            this.unflushed_write = false;
            this.wrote_request = true;
            if let Some(hooks) = &this.hooks {
                hooks.wrote_request();
            }
        }
        flushed
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();
        let written = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.record_write(&written);
        written
    }
}

impl<T> Connection for TracedConnection<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}
