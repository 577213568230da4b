//! Per-socket HTTP/1.x connection engine.
//!
//! # Responsibilities
//! - Read request heads into a fixed buffer under an inactivity timer
//! - Finalize, route and dispatch each request to its handler
//! - Reuse the connection for keep-alive, carrying pipelined bytes forward
//! - Release the transport to a handler that upgrades the connection
//!
//! # Design Decisions
//! - The transport is split: the engine task owns the read half, the write
//!   half lives behind the per-connection lock with the timer state
//! - Every read attempt gets a generation number; a read completion marks
//!   its generation canceled under the lock and the timer checks it when
//!   firing
//! - Closing is the only cancellation: a watch flag wakes any pending read

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::http::body::RequestBody;
use crate::http::handler::{Handler, RequestContext, UpgradeFn, Upgraded};
use crate::http::parser::RequestParser;
use crate::http::request::{ConnectionInfo, Request};
use crate::http::response::{Response, CONTINUE};
use crate::net::transport::BoxedTransport;
use crate::observability::metrics;
use crate::routing::Router;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequestLine,
    AwaitingHeaders,
    Dispatched,
    Closed,
}

/// Timeouts and limits for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub first_request_timeout: Duration,
    pub reuse_timeout: Duration,
    pub buffer_length: usize,
    pub max_input_length: usize,
    pub max_reuses: u32,
    pub write_timeout: Duration,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            first_request_timeout: config.first_request_timeout(),
            reuse_timeout: config.reuse_timeout(),
            buffer_length: config.buffer_length,
            max_input_length: config.max_input_length,
            max_reuses: config.max_reuses,
            write_timeout: config.write_timeout(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

/// Resolves once `closed` carries `true`.
pub(crate) async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

struct SyncState {
    writer: Option<WriteHalf<BoxedTransport>>,
    canceled: u64,
    timer: Option<JoinHandle<()>>,
}

/// Shared side of a connection: writer, timer and close flag.
///
/// Held by the engine task, the timer task, the request context and the
/// listener (for forced closes).
pub struct ConnectionHandle {
    id: ConnectionId,
    info: ConnectionInfo,
    sync: Mutex<SyncState>,
    attempts: AtomicU64,
    write_timeout: Duration,
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Start the inactivity timer for a new read attempt.
    async fn arm_timer(self: &Arc<Self>, timeout: Duration) -> u64 {
        let epoch = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(conn) = weak.upgrade() {
                conn.on_timeout(epoch).await;
            }
        });

        let mut sync = self.sync.lock().await;
        if let Some(previous) = sync.timer.replace(timer) {
            previous.abort();
        }
        epoch
    }

    /// Mark `epoch` as completed. Returns false if the connection closed.
    async fn cancel_timer(&self, epoch: u64) -> bool {
        let mut sync = self.sync.lock().await;
        sync.canceled = sync.canceled.max(epoch);
        if let Some(timer) = sync.timer.take() {
            timer.abort();
        }
        sync.writer.is_some()
    }

    async fn on_timeout(&self, epoch: u64) {
        let mut sync = self.sync.lock().await;
        if sync.writer.is_none() || sync.canceled >= epoch {
            return;
        }
        // Detach our own handle so closing does not abort this task.
        sync.timer = None;
        tracing::debug!(connection_id = %self.id, peer = %self.info.remote_addr, "Request timed out");
        write_error(&mut sync, &Error::Timeout, self.write_timeout).await;
        self.close_locked(&mut sync).await;
    }

    async fn close_locked(&self, sync: &mut SyncState) {
        if let Some(timer) = sync.timer.take() {
            timer.abort();
        }
        if let Some(mut writer) = sync.writer.take() {
            let _ = tokio::time::timeout(self.write_timeout, writer.shutdown()).await;
        }
        self.closed.send_replace(true);
    }

    /// Close the socket and wake any pending read.
    pub async fn close(&self) {
        let mut sync = self.sync.lock().await;
        self.close_locked(&mut sync).await;
    }

    pub(crate) async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut sync = self.sync.lock().await;
        let writer = sync
            .writer
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::NotConnected.into()))?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn send_response(&self, response: &Response, body: &[u8]) -> Result<()> {
        let head = response.render_head(body.len());
        let mut sync = self.sync.lock().await;
        let writer = sync
            .writer
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::NotConnected.into()))?;
        writer.write_all(&head).await?;
        writer.write_all(body).await?;
        writer.flush().await?;
        metrics::record_request(response.status().as_u16());
        Ok(())
    }

    /// Send the error page for `error` and close.
    pub(crate) async fn fail(&self, error: &Error) {
        let mut sync = self.sync.lock().await;
        write_error(&mut sync, error, self.write_timeout).await;
        self.close_locked(&mut sync).await;
    }

    async fn take_writer(&self) -> Option<WriteHalf<BoxedTransport>> {
        let mut sync = self.sync.lock().await;
        if let Some(timer) = sync.timer.take() {
            timer.abort();
        }
        sync.writer.take()
    }
}

/// Write the error page for `error`, giving up after `limit`.
async fn write_error(sync: &mut SyncState, error: &Error, limit: Duration) {
    let Some(writer) = sync.writer.as_mut() else {
        return;
    };
    let status = error.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (response, body) = Response::error(status, error.status_message());
    let head = response.render_head(body.len());
    let written = tokio::time::timeout(limit, async {
        writer.write_all(&head).await?;
        writer.write_all(&body).await?;
        writer.flush().await
    })
    .await;
    if matches!(written, Ok(Ok(()))) {
        metrics::record_request(status.as_u16());
    }
}

enum Outcome {
    Reuse,
    Close,
    Upgrade(UpgradeFn, Vec<u8>),
}

/// One accepted connection and its engine state.
pub struct Connection {
    handle: Arc<ConnectionHandle>,
    reader: ReadHalf<BoxedTransport>,
    closed: watch::Receiver<bool>,
    buffer: Box<[u8]>,
    request_buffer: Vec<u8>,
    parser: RequestParser,
    state: ConnectionState,
    reuses: u32,
    timeout: Duration,
    settings: Arc<ConnectionSettings>,
    router: Arc<Router<dyn Handler>>,
}

impl Connection {
    pub fn new(
        io: BoxedTransport,
        info: ConnectionInfo,
        settings: Arc<ConnectionSettings>,
        router: Arc<Router<dyn Handler>>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let (closed_tx, closed) = watch::channel(false);
        let handle = Arc::new(ConnectionHandle {
            id: ConnectionId::new(),
            info,
            sync: Mutex::new(SyncState {
                writer: Some(writer),
                canceled: 0,
                timer: None,
            }),
            attempts: AtomicU64::new(0),
            write_timeout: settings.write_timeout,
            closed: closed_tx,
        });

        Self {
            handle,
            reader,
            closed,
            buffer: vec![0u8; settings.buffer_length].into_boxed_slice(),
            request_buffer: Vec::with_capacity(settings.buffer_length),
            parser: RequestParser::new(settings.max_input_length),
            state: ConnectionState::AwaitingRequestLine,
            reuses: 0,
            timeout: settings.first_request_timeout,
            settings,
            router,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn handle(&self) -> Arc<ConnectionHandle> {
        Arc::clone(&self.handle)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Requests served after the first one.
    pub fn reuses(&self) -> u32 {
        self.reuses
    }

    /// Serve requests until the connection closes or is upgraded.
    pub async fn run(mut self) {
        metrics::connection_opened();
        tracing::trace!(connection_id = %self.handle.id, peer = %self.handle.info.remote_addr, "Connection opened");

        loop {
            match self.read_request().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::debug!(connection_id = %self.handle.id, error = %e, "Rejected request head");
                    self.handle.fail(&e).await;
                    break;
                }
            }

            self.state = ConnectionState::Dispatched;
            match self.process().await {
                Outcome::Reuse => continue,
                Outcome::Close => break,
                Outcome::Upgrade(callback, leftover) => {
                    self.hand_off(callback, leftover).await;
                    metrics::connection_closed();
                    return;
                }
            }
        }

        self.state = ConnectionState::Closed;
        self.handle.close().await;
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.handle.id, reuses = self.reuses, "Connection closed");
    }

    /// Read until a full request head is buffered.
    ///
    /// `Ok(false)` means the peer went away, the timer fired or the
    /// connection was closed.
    async fn read_request(&mut self) -> Result<bool> {
        loop {
            if self.parser.feed(&self.request_buffer)? {
                return Ok(true);
            }
            if self.parser.in_headers() {
                self.state = ConnectionState::AwaitingHeaders;
            }

            let epoch = self.handle.arm_timer(self.timeout).await;
            let read = tokio::select! {
                read = self.reader.read(&mut self.buffer) => read,
                _ = closed_signal(&mut self.closed) => return Ok(false),
            };
            if !self.handle.cancel_timer(epoch).await {
                return Ok(false);
            }

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(connection_id = %self.handle.id, error = %e, "Read failed");
                    return Ok(false);
                }
            };
            if n == 0 {
                return Ok(false);
            }
            self.request_buffer.extend_from_slice(&self.buffer[..n]);
        }
    }

    async fn process(&mut self) -> Outcome {
        let request = match self
            .parser
            .take_head()
            .and_then(|head| Request::from_head(head, self.handle.info))
        {
            Ok(request) => request,
            Err(e) => {
                self.handle.fail(&e).await;
                return Outcome::Close;
            }
        };

        if request.expects_continue() && self.handle.write_all(CONTINUE).await.is_err() {
            return Outcome::Close;
        }

        let Some(route) = self.router.resolve(request.url()) else {
            let path = request.url().path().to_string();
            tracing::debug!(connection_id = %self.handle.id, path = %path, "No handler for request");
            self.handle.fail(&Error::RouteNotFound(path)).await;
            return Outcome::Close;
        };

        tracing::debug!(
            connection_id = %self.handle.id,
            method = %request.method(),
            url = %request.url(),
            prefix = %route.prefix,
            "Dispatching request"
        );

        let keep_alive = request.keep_alive() && self.reuses + 1 < self.settings.max_reuses;
        let framing = request.framing();
        let reuse_timeout = self.settings.reuse_timeout;
        let mut position = self.parser.position();

        let outcome = {
            let body = RequestBody::new(
                framing,
                &mut self.reader,
                &mut self.buffer,
                &mut self.request_buffer,
                &mut position,
                self.closed.clone(),
            );
            let mut ctx = RequestContext::new(request, body, Arc::clone(&self.handle), keep_alive);
            let result = route.handler.handle(&mut ctx).await;

            if let Some(callback) = ctx.take_upgrade() {
                Some(callback)
            } else {
                if let Err(e) = &result {
                    tracing::warn!(connection_id = %self.handle.id, error = %e, "Handler failed");
                }
                if !ctx.is_responded() {
                    let _ = match &result {
                        Ok(()) => ctx.send(&[]).await,
                        Err(e) => {
                            let status = e.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                            ctx.send_error(status, e.status_message()).await
                        }
                    };
                }
                if ctx.should_close() {
                    return Outcome::Close;
                }
                match tokio::time::timeout(reuse_timeout, ctx.body().drain()).await {
                    Ok(Ok(())) => None,
                    _ => return Outcome::Close,
                }
            }
        };

        if let Some(callback) = outcome {
            let leftover = self.request_buffer.split_off(position.min(self.request_buffer.len()));
            return Outcome::Upgrade(callback, leftover);
        }

        self.request_buffer.drain(..position.min(self.request_buffer.len()));
        self.parser.reset();
        self.reuses += 1;
        self.timeout = reuse_timeout;
        self.state = ConnectionState::AwaitingRequestLine;
        Outcome::Reuse
    }

    async fn hand_off(self, callback: UpgradeFn, leftover: Vec<u8>) {
        let Some(writer) = self.handle.take_writer().await else {
            return;
        };
        let info = self.handle.info;
        tracing::debug!(connection_id = %self.handle.id, "Connection upgraded");
        let io = self.reader.unsplit(writer);
        tokio::spawn(callback(Upgraded {
            io,
            leftover,
            local_addr: info.local_addr,
            remote_addr: info.remote_addr,
        }));
    }
}
