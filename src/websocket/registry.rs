//! Session registry for one WebSocket service path.
//!
//! # Responsibilities
//! - Hold the id → session map for one service
//! - Broadcast messages and pings to every session
//! - Periodically sweep sessions that stop answering pings
//! - Close every session with one precomputed frame on stop
//!
//! # Design Decisions
//! - One `tokio::sync::Mutex` guards the map; stop and sweep await session
//!   closes while holding it so no session is added mid-shutdown
//! - Broadcasts snapshot the map and send outside the lock
//! - The sweep is single-flight: a tick that finds one running is skipped
//! - Lifecycle state lives in an atomic so readers never lock

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::websocket::close::{is_close_status_code, is_reserved, CloseStatusCode};
use crate::websocket::frame::{read_frame, Frame, Opcode, FRAGMENT_LENGTH, MAX_CONTROL_PAYLOAD};
use crate::websocket::payload::{PayloadData, NO_STATUS};
use crate::websocket::session::{CompressionCache, WebSocketSession, WebSocketState};

/// Lifecycle of a registry (and of the server that owns it).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Ready = 0,
    Start = 1,
    ShuttingDown = 2,
    Stop = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Ready,
            1 => ServerState::Start,
            2 => ServerState::ShuttingDown,
            _ => ServerState::Stop,
        }
    }
}

/// Callback run after a spawned send or broadcast completes.
pub type Completed = Box<dyn FnOnce() + Send + 'static>;

type SessionMap = HashMap<String, Arc<dyn WebSocketSession>>;

struct Inner {
    sessions: Mutex<SessionMap>,
    state: AtomicU8,
    keep_clean: AtomicBool,
    wait_time_ms: AtomicU64,
    sweep_interval: Duration,
    max_payload_length: u64,
    sweeping: AtomicBool,
    sweep_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Sessions of one WebSocket service.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::from_config(&WebSocketConfig::default())
    }

    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                state: AtomicU8::new(ServerState::Ready as u8),
                keep_clean: AtomicBool::new(config.keep_clean),
                wait_time_ms: AtomicU64::new(config.wait_time_ms.max(1)),
                sweep_interval: config.sweep_interval(),
                max_payload_length: config.max_payload_length,
                sweeping: AtomicBool::new(false),
                sweep_timer: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn is_started(&self) -> bool {
        self.state() == ServerState::Start
    }

    fn can_configure(&self) -> bool {
        matches!(self.state(), ServerState::Ready | ServerState::Stop)
    }

    pub fn keep_clean(&self) -> bool {
        self.inner.keep_clean.load(Ordering::Relaxed)
    }

    /// Returns `false` when the registry is running.
    pub fn set_keep_clean(&self, value: bool) -> bool {
        if !self.can_configure() {
            return false;
        }
        self.inner.keep_clean.store(value, Ordering::Relaxed);
        true
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.inner.wait_time_ms.load(Ordering::Relaxed))
    }

    /// Returns `Ok(false)` when the registry is running.
    pub fn set_wait_time(&self, value: Duration) -> Result<bool> {
        if value.is_zero() {
            return Err(Error::InvalidArgument("wait time must be greater than zero".into()));
        }
        if !self.can_configure() {
            return Ok(false);
        }
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX).max(1);
        self.inner.wait_time_ms.store(ms, Ordering::Relaxed);
        Ok(true)
    }

    /// Largest frame payload accepted from a peer of this service.
    pub fn max_payload_length(&self) -> u64 {
        self.inner.max_payload_length
    }

    /// Read and unmask one client frame, enforcing the payload limit.
    ///
    /// An oversized frame fails with [`Error::PayloadTooBig`], whose close
    /// code is 1009.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Frame>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        read_frame(reader, true, self.inner.max_payload_length).await
    }

    /// Enter Start and, with keep-clean on, arm the sweep timer.
    pub fn start(&self) {
        if !self.can_configure() {
            return;
        }
        self.set_state(ServerState::Start);
        if self.keep_clean() {
            self.arm_sweep_timer();
        }
        tracing::debug!(keep_clean = self.keep_clean(), "Session registry started");
    }

    fn arm_sweep_timer(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticks.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                SessionRegistry { inner }.sweep().await;
            }
        });
        if let Ok(mut slot) = self.inner.sweep_timer.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    fn abort_sweep_timer(&self) {
        if let Ok(mut slot) = self.inner.sweep_timer.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Close every session and enter Stop.
    ///
    /// 1005 sends a close frame with an empty payload; other reserved codes
    /// close the sessions without sending a frame.
    pub async fn stop(&self, code: u16, reason: &str) -> Result<()> {
        let (payload, frame) = close_frame(code, reason)?;

        let mut sessions = self.inner.sessions.lock().await;
        if !self.is_started() {
            return Ok(());
        }
        self.set_state(ServerState::ShuttingDown);
        self.abort_sweep_timer();

        for (id, session) in sessions.iter() {
            tracing::trace!(session_id = %id, code, "Closing session");
            session.close(&payload, frame.as_deref()).await;
        }
        metrics::sessions_removed(sessions.len());
        sessions.clear();

        self.set_state(ServerState::Stop);
        tracing::debug!(code, "Session registry stopped");
        Ok(())
    }

    /// Register a session; `None` unless the registry is started.
    pub async fn add(&self, session: Arc<dyn WebSocketSession>) -> Option<String> {
        let mut sessions = self.inner.sessions.lock().await;
        if !self.is_started() {
            return None;
        }
        let id = create_id();
        sessions.insert(id.clone(), session);
        metrics::sessions_added(1);
        tracing::debug!(session_id = %id, "Session added");
        Some(id)
    }

    /// Remove a session; `false` unless started and present.
    pub async fn remove(&self, id: &str) -> bool {
        if !self.is_started() {
            return false;
        }
        let mut sessions = self.inner.sessions.lock().await;
        if !self.is_started() {
            return false;
        }
        let removed = sessions.remove(id).is_some();
        if removed {
            metrics::sessions_removed(1);
            tracing::debug!(session_id = %id, "Session removed");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Ids of the registered sessions; empty unless started.
    pub async fn ids(&self) -> Vec<String> {
        if !self.is_started() {
            return Vec::new();
        }
        self.inner.sessions.lock().await.keys().cloned().collect()
    }

    pub async fn sessions(&self) -> Vec<Arc<dyn WebSocketSession>> {
        self.inner.sessions.lock().await.values().cloned().collect()
    }

    /// `None` unless started and `id` is registered.
    pub async fn try_get_session(&self, id: &str) -> Option<Arc<dyn WebSocketSession>> {
        if !self.is_started() {
            return None;
        }
        self.inner.sessions.lock().await.get(id).cloned()
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn WebSocketSession>)> {
        self.inner
            .sessions
            .lock()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(s)))
            .collect()
    }

    async fn session(&self, id: &str) -> Result<Arc<dyn WebSocketSession>> {
        self.ensure_started()?;
        self.try_get_session(id)
            .await
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(Error::InvalidState("the registry is not started"))
        }
    }

    /// Send one message to every session.
    pub async fn broadcast_message(&self, opcode: Opcode, data: &[u8]) -> Result<()> {
        self.ensure_started()?;
        let snapshot = self.snapshot().await;
        self.broadcast_to(snapshot, opcode, data).await;
        Ok(())
    }

    async fn broadcast_to(
        &self,
        sessions: Vec<(String, Arc<dyn WebSocketSession>)>,
        opcode: Opcode,
        data: &[u8],
    ) {
        let mut cache = CompressionCache::new();
        let fragmented = data.len() > FRAGMENT_LENGTH;
        for (id, session) in sessions {
            if !self.is_started() {
                tracing::error!("The service is shutting down; broadcast abandoned");
                break;
            }
            let sent = if fragmented {
                session.send_fragmented(opcode, data, &mut cache).await
            } else {
                session.send(opcode, data, &mut cache).await
            };
            if let Err(e) = sent {
                tracing::warn!(session_id = %id, error = %e, "Broadcast send failed");
            }
        }
    }

    pub async fn broadcast(&self, data: &[u8]) -> Result<()> {
        self.broadcast_message(Opcode::Binary, data).await
    }

    pub async fn broadcast_text(&self, text: &str) -> Result<()> {
        self.broadcast_message(Opcode::Text, text.as_bytes()).await
    }

    /// Read `len` bytes from `reader` and broadcast them as binary.
    pub async fn broadcast_stream<R>(&self, reader: &mut R, len: usize) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_started()?;
        let data = read_stream(reader, len).await?;
        self.broadcast(&data).await
    }

    /// Spawn a broadcast and return once it is scheduled.
    pub fn broadcast_async(
        &self,
        opcode: Opcode,
        data: Vec<u8>,
        completed: Option<Completed>,
    ) -> Result<JoinHandle<()>> {
        self.ensure_started()?;
        let registry = self.clone();
        Ok(tokio::spawn(async move {
            let snapshot = registry.snapshot().await;
            registry.broadcast_to(snapshot, opcode, &data).await;
            if let Some(done) = completed {
                done();
            }
        }))
    }

    /// Ping every session concurrently; each ping is bounded by the wait time.
    pub async fn broadping(&self) -> Result<HashMap<String, bool>> {
        self.ensure_started()?;
        let frame = Frame::ping(PayloadData::empty(), false)?.to_bytes();
        Ok(self.broadping_frame(&frame).await)
    }

    /// Ping every session with `message` (at most 125 bytes).
    pub async fn broadping_with_message(&self, message: &str) -> Result<HashMap<String, bool>> {
        self.ensure_started()?;
        check_ping_message(message)?;
        let frame = Frame::ping(message.as_bytes(), false)?.to_bytes();
        Ok(self.broadping_frame(&frame).await)
    }

    async fn broadping_frame(&self, frame: &[u8]) -> HashMap<String, bool> {
        let wait = self.wait_time();
        let snapshot = self.snapshot().await;
        let pings = snapshot.into_iter().map(|(id, session)| async move {
            if !self.is_started() {
                return (id, false);
            }
            let alive = tokio::time::timeout(wait, session.ping(frame))
                .await
                .unwrap_or(false);
            (id, alive)
        });
        join_all(pings).await.into_iter().collect()
    }

    /// Ids of sessions that answered a ping within the wait time.
    pub async fn active_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .broadping()
            .await?
            .into_iter()
            .filter_map(|(id, alive)| alive.then_some(id))
            .collect())
    }

    /// Ids of sessions that did not answer a ping within the wait time.
    pub async fn inactive_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .broadping()
            .await?
            .into_iter()
            .filter_map(|(id, alive)| (!alive).then_some(id))
            .collect())
    }

    /// Close or drop sessions that failed a ping.
    ///
    /// Open sessions are closed with 1006 (no frame) and removed once closed;
    /// Closing sessions are left to finish; anything else is removed.
    pub async fn sweep(&self) {
        if !self.is_started() {
            return;
        }
        if self.inner.sweeping.swap(true, Ordering::AcqRel) {
            tracing::trace!("Sweep already running");
            return;
        }
        let _guard = SweepGuard(&self.inner.sweeping);

        let inactive = match self.inactive_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::debug!(error = %e, "Sweep skipped");
                return;
            }
        };

        let abnormal = PayloadData::from_close(CloseStatusCode::Abnormal.as_u16(), "");
        let mut removed = 0usize;
        for id in inactive {
            let mut sessions = self.inner.sessions.lock().await;
            if !self.is_started() {
                break;
            }
            let Some(session) = sessions.get(&id).cloned() else {
                continue;
            };
            match session.state() {
                WebSocketState::Open => {
                    tracing::debug!(session_id = %id, "Closing inactive session");
                    session.close(&abnormal, None).await;
                    if session.state() == WebSocketState::Closed {
                        sessions.remove(&id);
                        removed += 1;
                    }
                }
                WebSocketState::Closing => continue,
                _ => {
                    sessions.remove(&id);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            metrics::sessions_removed(removed);
            tracing::info!(removed, "Swept inactive sessions");
        }
        metrics::record_sweep();
    }

    pub async fn send_to(&self, id: &str, data: &[u8]) -> Result<()> {
        self.send_message_to(id, Opcode::Binary, data).await
    }

    pub async fn send_text_to(&self, id: &str, text: &str) -> Result<()> {
        self.send_message_to(id, Opcode::Text, text.as_bytes()).await
    }

    pub async fn send_stream_to<R>(&self, id: &str, reader: &mut R, len: usize) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let data = read_stream(reader, len).await?;
        self.send_to(id, &data).await
    }

    async fn send_message_to(&self, id: &str, opcode: Opcode, data: &[u8]) -> Result<()> {
        let session = self.session(id).await?;
        let mut cache = CompressionCache::new();
        if data.len() > FRAGMENT_LENGTH {
            session.send_fragmented(opcode, data, &mut cache).await
        } else {
            session.send(opcode, data, &mut cache).await
        }
    }

    /// Spawn a send to one session.
    pub fn send_to_async(
        &self,
        id: &str,
        opcode: Opcode,
        data: Vec<u8>,
        completed: Option<Completed>,
    ) -> JoinHandle<Result<()>> {
        let registry = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let result = registry.send_message_to(&id, opcode, &data).await;
            if let Some(done) = completed {
                done();
            }
            result
        })
    }

    /// Ping one session; `Ok(false)` when it did not answer in time.
    pub async fn ping_to(&self, id: &str) -> Result<bool> {
        let frame = Frame::ping(PayloadData::empty(), false)?.to_bytes();
        self.ping_frame_to(id, &frame).await
    }

    pub async fn ping_to_with_message(&self, id: &str, message: &str) -> Result<bool> {
        check_ping_message(message)?;
        let frame = Frame::ping(message.as_bytes(), false)?.to_bytes();
        self.ping_frame_to(id, &frame).await
    }

    async fn ping_frame_to(&self, id: &str, frame: &[u8]) -> Result<bool> {
        let session = self.session(id).await?;
        Ok(tokio::time::timeout(self.wait_time(), session.ping(frame))
            .await
            .unwrap_or(false))
    }

    /// Close one session with no status code.
    pub async fn close_session(&self, id: &str) -> Result<()> {
        self.close_session_with(id, NO_STATUS, "").await
    }

    /// Close one session with `code` and `reason` (at most 123 bytes).
    pub async fn close_session_with(&self, id: &str, code: u16, reason: &str) -> Result<()> {
        let (payload, frame) = close_frame(code, reason)?;
        let session = self.session(id).await?;
        session.close(&payload, frame.as_deref()).await;
        Ok(())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweep_timer.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// 32 lowercase hex characters from a random 128-bit value.
fn create_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn check_ping_message(message: &str) -> Result<()> {
    if message.len() > MAX_CONTROL_PAYLOAD {
        return Err(Error::InvalidArgument(format!(
            "ping message of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
            message.len()
        )));
    }
    Ok(())
}

/// Validate a close request and precompute its frame.
fn close_frame(code: u16, reason: &str) -> Result<(PayloadData, Option<Vec<u8>>)> {
    if !is_close_status_code(code) {
        return Err(Error::InvalidArgument(format!("{code} is not a close status code")));
    }
    if code == NO_STATUS {
        if !reason.is_empty() {
            return Err(Error::InvalidArgument(
                "a reason cannot be sent with 1005".into(),
            ));
        }
        let frame = Frame::close(PayloadData::empty(), false)?.to_bytes();
        return Ok((PayloadData::empty(), Some(frame)));
    }
    if reason.len() > MAX_CONTROL_PAYLOAD - 2 {
        return Err(Error::InvalidArgument(format!(
            "close reason of {} bytes exceeds {}",
            reason.len(),
            MAX_CONTROL_PAYLOAD - 2
        )));
    }

    let payload = PayloadData::from_close(code, reason);
    if is_reserved(code) {
        return Ok((payload, None));
    }
    let frame = Frame::close(payload.clone(), false)?.to_bytes();
    Ok((payload, Some(frame)))
}

async fn read_stream<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut data = Vec::with_capacity(len.min(64 * 1024));
    (&mut *reader).take(len as u64).read_to_end(&mut data).await?;
    if data.is_empty() {
        return Err(Error::InvalidArgument("no data could be read from the stream".into()));
    }
    if data.len() < len {
        tracing::warn!(expected = len, actual = data.len(), "Stream ended early");
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Whole(Opcode, usize),
        Fragmented(Opcode, usize),
    }

    struct MockSession {
        state: StdMutex<WebSocketState>,
        responsive: bool,
        sent: StdMutex<Vec<Sent>>,
        closes: StdMutex<Vec<(u16, Option<Vec<u8>>)>>,
    }

    impl MockSession {
        fn new(state: WebSocketState, responsive: bool) -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(state),
                responsive,
                sent: StdMutex::new(Vec::new()),
                closes: StdMutex::new(Vec::new()),
            })
        }

        fn open(responsive: bool) -> Arc<Self> {
            Self::new(WebSocketState::Open, responsive)
        }
    }

    #[async_trait]
    impl WebSocketSession for MockSession {
        fn state(&self) -> WebSocketState {
            *self.state.lock().unwrap()
        }

        async fn send(&self, opcode: Opcode, data: &[u8], _: &mut CompressionCache) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Whole(opcode, data.len()));
            Ok(())
        }

        async fn send_fragmented(
            &self,
            opcode: Opcode,
            data: &[u8],
            _: &mut CompressionCache,
        ) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Fragmented(opcode, data.len()));
            Ok(())
        }

        async fn ping(&self, _frame: &[u8]) -> bool {
            if self.responsive && self.state() == WebSocketState::Open {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            false
        }

        async fn close(&self, payload: &PayloadData, frame: Option<&[u8]>) {
            self.closes
                .lock()
                .unwrap()
                .push((payload.code(), frame.map(<[u8]>::to_vec)));
            *self.state.lock().unwrap() = WebSocketState::Closed;
        }
    }

    fn fast_registry() -> SessionRegistry {
        let registry = SessionRegistry::from_config(&WebSocketConfig {
            keep_clean: false,
            wait_time_ms: 50,
            ..WebSocketConfig::default()
        });
        registry.start();
        registry
    }

    #[tokio::test]
    async fn add_and_remove_require_start() {
        let registry = SessionRegistry::new();
        assert!(registry.add(MockSession::open(true)).await.is_none());
        assert!(!registry.remove("missing").await);

        registry.start();
        let id = registry.add(MockSession::open(true)).await.unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(registry.count().await, 1);
        assert!(registry.remove(&id).await);
        assert!(!registry.remove(&id).await);
    }

    #[tokio::test]
    async fn sweep_removes_unresponsive_and_keeps_responsive() {
        let registry = fast_registry();
        let alive = MockSession::open(true);
        let dead = MockSession::open(false);
        let alive_id = registry.add(alive.clone()).await.unwrap();
        let dead_id = registry.add(dead.clone()).await.unwrap();

        registry.sweep().await;

        let ids = registry.ids().await;
        assert_eq!(ids, vec![alive_id]);
        assert!(registry.try_get_session(&dead_id).await.is_none());
        assert_eq!(*dead.closes.lock().unwrap(), vec![(1006, None)]);
        assert!(alive.closes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_leaves_closing_sessions_and_drops_closed() {
        let registry = fast_registry();
        let closing = MockSession::new(WebSocketState::Closing, false);
        let closed = MockSession::new(WebSocketState::Closed, false);
        let closing_id = registry.add(closing.clone()).await.unwrap();
        registry.add(closed).await.unwrap();

        registry.sweep().await;

        assert_eq!(registry.ids().await, vec![closing_id]);
        assert!(closing.closes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_fragments_large_payloads() {
        let registry = fast_registry();
        let a = MockSession::open(true);
        let b = MockSession::open(true);
        registry.add(a.clone()).await.unwrap();
        registry.add(b.clone()).await.unwrap();

        registry.broadcast_text("hello").await.unwrap();
        registry.broadcast(&vec![0u8; FRAGMENT_LENGTH + 1]).await.unwrap();

        for session in [a, b] {
            assert_eq!(
                *session.sent.lock().unwrap(),
                vec![
                    Sent::Whole(Opcode::Text, 5),
                    Sent::Fragmented(Opcode::Binary, FRAGMENT_LENGTH + 1)
                ]
            );
        }
    }

    #[tokio::test]
    async fn broadcast_requires_start() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.broadcast(b"x").await,
            Err(Error::InvalidState(_))
        ));
        assert!(registry.broadcast_async(Opcode::Text, b"x".to_vec(), None).is_err());
    }

    #[tokio::test]
    async fn broadcast_async_runs_completion() {
        let registry = fast_registry();
        let session = MockSession::open(true);
        registry.add(session.clone()).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = registry
            .broadcast_async(
                Opcode::Binary,
                vec![1, 2, 3],
                Some(Box::new(move || {
                    let _ = tx.send(());
                })),
            )
            .unwrap();
        handle.await.unwrap();
        rx.await.unwrap();
        assert_eq!(*session.sent.lock().unwrap(), vec![Sent::Whole(Opcode::Binary, 3)]);
    }

    #[tokio::test]
    async fn broadcast_stream_reads_declared_length() {
        let registry = fast_registry();
        let session = MockSession::open(true);
        registry.add(session.clone()).await.unwrap();

        let mut reader: &[u8] = b"abcdefgh";
        registry.broadcast_stream(&mut reader, 4).await.unwrap();
        assert_eq!(*session.sent.lock().unwrap(), vec![Sent::Whole(Opcode::Binary, 4)]);

        let mut empty: &[u8] = b"";
        assert!(registry.broadcast_stream(&mut empty, 4).await.is_err());
    }

    #[tokio::test]
    async fn stop_sends_one_close_frame_per_session() {
        let registry = fast_registry();
        let a = MockSession::open(true);
        let b = MockSession::open(true);
        registry.add(a.clone()).await.unwrap();
        registry.add(b.clone()).await.unwrap();

        registry.stop(1001, "bye").await.unwrap();

        assert_eq!(registry.state(), ServerState::Stop);
        assert_eq!(registry.count().await, 0);
        let expected = Frame::close(PayloadData::from_close(1001, "bye"), false)
            .unwrap()
            .to_bytes();
        for session in [a, b] {
            assert_eq!(*session.closes.lock().unwrap(), vec![(1001, Some(expected.clone()))]);
        }
    }

    #[tokio::test]
    async fn stop_with_reserved_codes() {
        let registry = fast_registry();
        let session = MockSession::open(true);
        registry.add(session.clone()).await.unwrap();
        registry.stop(1006, "").await.unwrap();
        assert_eq!(*session.closes.lock().unwrap(), vec![(1006, None)]);

        registry.start();
        let session = MockSession::open(true);
        registry.add(session.clone()).await.unwrap();
        registry.stop(1005, "").await.unwrap();
        assert_eq!(*session.closes.lock().unwrap(), vec![(1005, Some(vec![0x88, 0x00]))]);
    }

    #[tokio::test]
    async fn close_arguments_are_validated() {
        let registry = fast_registry();
        let id = registry.add(MockSession::open(true)).await.unwrap();
        assert!(registry.close_session_with(&id, 999, "").await.is_err());
        assert!(registry.close_session_with(&id, 1005, "why").await.is_err());
        assert!(registry.close_session_with(&id, 1000, &"x".repeat(124)).await.is_err());
        assert!(matches!(
            registry.close_session("missing").await,
            Err(Error::SessionNotFound(_))
        ));
        registry.close_session_with(&id, 1000, "done").await.unwrap();
    }

    #[tokio::test]
    async fn setters_only_apply_while_idle() {
        let registry = SessionRegistry::new();
        assert!(registry.set_wait_time(Duration::ZERO).is_err());
        assert!(registry.set_wait_time(Duration::from_millis(200)).unwrap());
        assert_eq!(registry.wait_time(), Duration::from_millis(200));
        assert!(registry.set_keep_clean(false));

        registry.start();
        assert!(!registry.set_keep_clean(true));
        assert!(!registry.set_wait_time(Duration::from_secs(2)).unwrap());

        registry.stop(1001, "").await.unwrap();
        assert!(registry.set_keep_clean(true));
    }

    /// Session whose close waits until released.
    struct Stalled {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl WebSocketSession for Stalled {
        fn state(&self) -> WebSocketState {
            WebSocketState::Open
        }

        async fn send(&self, _: Opcode, _: &[u8], _: &mut CompressionCache) -> Result<()> {
            Ok(())
        }

        async fn send_fragmented(&self, _: Opcode, _: &[u8], _: &mut CompressionCache) -> Result<()> {
            Ok(())
        }

        async fn ping(&self, _frame: &[u8]) -> bool {
            true
        }

        async fn close(&self, _payload: &PayloadData, _frame: Option<&[u8]>) {
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn lookups_are_empty_unless_started() {
        let registry = SessionRegistry::from_config(&WebSocketConfig {
            keep_clean: false,
            ..WebSocketConfig::default()
        });
        assert!(registry.ids().await.is_empty());
        assert!(registry.try_get_session("missing").await.is_none());
        assert!(matches!(
            registry.send_text_to("missing", "x").await,
            Err(Error::InvalidState(_))
        ));

        registry.start();
        let release = Arc::new(tokio::sync::Notify::new());
        let id = registry
            .add(Arc::new(Stalled {
                release: Arc::clone(&release),
            }))
            .await
            .unwrap();
        assert_eq!(registry.ids().await, vec![id.clone()]);
        assert!(registry.try_get_session(&id).await.is_some());

        let stopping = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.stop(1001, "").await })
        };
        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.state() != ServerState::ShuttingDown {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // The session is still in the map while stop awaits its close.
        let ids = tokio::time::timeout(Duration::from_secs(1), registry.ids()).await.unwrap();
        assert!(ids.is_empty());
        let found = tokio::time::timeout(Duration::from_secs(1), registry.try_get_session(&id))
            .await
            .unwrap();
        assert!(found.is_none());

        release.notify_one();
        stopping.await.unwrap().unwrap();
        assert!(registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn read_frame_enforces_configured_payload_limit() {
        let registry = SessionRegistry::from_config(&WebSocketConfig {
            max_payload_length: 4,
            ..WebSocketConfig::default()
        });
        assert_eq!(registry.max_payload_length(), 4);

        let fits = Frame::new(true, Opcode::Text, PayloadData::new(b"abcd".to_vec()), false, true)
            .unwrap()
            .to_bytes();
        let mut reader: &[u8] = &fits;
        let Ok(frame) = registry.read_frame(&mut reader).await else {
            panic!("a 4-byte payload was rejected");
        };
        assert!(!frame.is_masked());
        assert_eq!(frame.payload().as_bytes(), b"abcd");

        let oversized = Frame::new(true, Opcode::Text, PayloadData::new(b"abcde".to_vec()), false, true)
            .unwrap()
            .to_bytes();
        let mut reader: &[u8] = &oversized;
        let Err(err) = registry.read_frame(&mut reader).await else {
            panic!("a 5-byte payload was accepted");
        };
        assert!(matches!(err, Error::PayloadTooBig { len: 5, max: 4 }));
        assert_eq!(err.close_code(), CloseStatusCode::TooBig);
        assert_eq!(err.close_code().as_u16(), 1009);
    }

    #[tokio::test]
    async fn ping_to_reports_liveness() {
        let registry = fast_registry();
        let alive = registry.add(MockSession::open(true)).await.unwrap();
        let dead = registry.add(MockSession::open(false)).await.unwrap();
        assert!(registry.ping_to(&alive).await.unwrap());
        assert!(!registry.ping_to(&dead).await.unwrap());
        assert!(registry.ping_to_with_message(&alive, &"p".repeat(126)).await.is_err());

        let active = registry.active_ids().await.unwrap();
        assert_eq!(active, vec![alive]);
    }
}
