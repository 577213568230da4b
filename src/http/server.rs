//! HTTP server front.
//!
//! # Responsibilities
//! - Register one `scheme://host:port/` prefix with an `EndpointManager`
//! - Host WebSocket services by path, each with its own `SessionRegistry`
//! - Hand WebSocket upgrade requests to the service's `SessionAcceptor`
//! - Dispatch other requests with a standard method to the user handler
//! - Start and stop the registries together with the endpoint
//!
//! # Design Decisions
//! - The WebSocket handshake is external: an acceptor receives the request
//!   and the upgraded transport
//! - Server-wide `keep_clean` and `wait_time` are pushed to every service
//! - An endpoint whose accept loop fails aborts the server with 1006

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use http::{Method, StatusCode};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, WebSocketConfig};
use crate::error::{Error, Result};
use crate::http::handler::{Handler, RequestContext, Upgraded};
use crate::http::request::Request;
use crate::net::{EndpointManager, EndpointOptions};
use crate::routing::ListenerPrefix;
use crate::websocket::close::CloseStatusCode;
use crate::websocket::registry::{ServerState, SessionRegistry};

/// Completes WebSocket handshakes for one service.
#[async_trait]
pub trait SessionAcceptor: Send + Sync + 'static {
    /// Take over `upgraded`, answer the handshake in `request` and register
    /// the resulting session with `registry`.
    async fn accept(&self, request: Request, upgraded: Upgraded, registry: SessionRegistry);
}

struct ServiceHost {
    registry: SessionRegistry,
    acceptor: Arc<dyn SessionAcceptor>,
}

struct Services {
    hosts: DashMap<String, Arc<ServiceHost>>,
    handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl Services {
    fn host(&self, path: &str) -> Option<Arc<ServiceHost>> {
        self.hosts.get(path).map(|entry| Arc::clone(entry.value()))
    }

    fn all(&self) -> Vec<Arc<ServiceHost>> {
        self.hosts.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// The prefix handler routing between WebSocket services and the user
/// handler.
struct Dispatch {
    services: Arc<Services>,
}

#[async_trait]
impl Handler for Dispatch {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<()> {
        if ctx.request().is_websocket_upgrade() {
            let path = service_path(ctx.request().url().path());
            let Some(host) = self.services.host(&path) else {
                tracing::debug!(path = %path, "No WebSocket service for path");
                return ctx.send_error(StatusCode::NOT_IMPLEMENTED, None).await;
            };
            let request = ctx.request().clone();
            return ctx.upgrade(move |upgraded| async move {
                let ServiceHost { registry, acceptor } = host.as_ref();
                acceptor.accept(request, upgraded, registry.clone()).await;
            });
        }

        if !is_standard_method(ctx.request().method()) {
            return ctx.send_error(StatusCode::NOT_IMPLEMENTED, None).await;
        }
        match self.services.handler() {
            Some(handler) => handler.handle(ctx).await,
            None => ctx.send_error(StatusCode::NOT_FOUND, None).await,
        }
    }
}

fn is_standard_method(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::CONNECT,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .contains(method)
}

/// Decoded path without a trailing slash (`/` stays `/`).
fn service_path(path: &str) -> String {
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

struct ServerInner {
    prefix: String,
    manager: Arc<EndpointManager>,
    services: Arc<Services>,
    state: Mutex<ServerState>,
    keep_clean: AtomicBool,
    wait_time_ms: AtomicU64,
    websocket: WebSocketConfig,
    failure_watch: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// An HTTP server hosting WebSocket services on one endpoint.
#[derive(Clone)]
pub struct HttpServer {
    inner: Arc<ServerInner>,
}

impl HttpServer {
    /// Server for `url` (`http(s)://host[:port]/`).
    pub fn new(url: &str, options: EndpointOptions, websocket: WebSocketConfig) -> Result<Self> {
        let prefix = ListenerPrefix::parse(url)?;
        if prefix.path() != "/" {
            return Err(Error::InvalidArgument(format!("{url} must not include a path")));
        }
        Ok(Self {
            inner: Arc::new(ServerInner {
                prefix: prefix.to_string(),
                manager: EndpointManager::new(options),
                services: Arc::new(Services {
                    hosts: DashMap::new(),
                    handler: RwLock::new(None),
                }),
                state: Mutex::new(ServerState::Ready),
                keep_clean: AtomicBool::new(websocket.keep_clean),
                wait_time_ms: AtomicU64::new(websocket.wait_time_ms.max(1)),
                websocket,
                failure_watch: std::sync::Mutex::new(None),
            }),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(
            &config.server.url,
            EndpointOptions::from_config(config)?,
            config.websocket.clone(),
        )
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub fn manager(&self) -> &Arc<EndpointManager> {
        &self.inner.manager
    }

    pub async fn state(&self) -> ServerState {
        *self.inner.state.lock().await
    }

    pub async fn is_listening(&self) -> bool {
        self.state().await == ServerState::Start
    }

    /// Handler for requests that are not WebSocket upgrades.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        *self
            .inner
            .services
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn keep_clean(&self) -> bool {
        self.inner.keep_clean.load(Ordering::Relaxed)
    }

    /// Applies to every service. Returns `false` while the server runs.
    pub async fn set_keep_clean(&self, value: bool) -> bool {
        let state = self.inner.state.lock().await;
        if !can_configure(*state) {
            return false;
        }
        self.inner.keep_clean.store(value, Ordering::Relaxed);
        for host in self.inner.services.all() {
            host.registry.set_keep_clean(value);
        }
        true
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.inner.wait_time_ms.load(Ordering::Relaxed))
    }

    /// Applies to every service. Returns `Ok(false)` while the server runs.
    pub async fn set_wait_time(&self, value: Duration) -> Result<bool> {
        if value.is_zero() {
            return Err(Error::InvalidArgument("wait time must be greater than zero".into()));
        }
        let state = self.inner.state.lock().await;
        if !can_configure(*state) {
            return Ok(false);
        }
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX).max(1);
        self.inner.wait_time_ms.store(ms, Ordering::Relaxed);
        for host in self.inner.services.all() {
            host.registry.set_wait_time(value)?;
        }
        Ok(true)
    }

    /// Host a WebSocket service at `path`.
    pub async fn add_websocket_service(&self, path: &str, acceptor: Arc<dyn SessionAcceptor>) -> Result<SessionRegistry> {
        if !path.starts_with('/') || path.contains('%') || path.contains('+') {
            return Err(Error::InvalidArgument(format!("{path} is not a valid service path")));
        }
        let path = service_path(path);

        let state = self.inner.state.lock().await;
        let registry = SessionRegistry::from_config(&self.inner.websocket);
        registry.set_keep_clean(self.keep_clean());
        registry.set_wait_time(self.wait_time())?;

        match self.inner.services.hosts.entry(path.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::InvalidArgument(format!("a service already exists at {path}")));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(ServiceHost {
                    registry: registry.clone(),
                    acceptor,
                }));
            }
        }
        if *state == ServerState::Start {
            registry.start();
        }
        tracing::info!(path = %path, "WebSocket service added");
        Ok(registry)
    }

    /// Stop and remove the service at `path` (sessions get 1001).
    pub async fn remove_websocket_service(&self, path: &str) -> Result<bool> {
        let path = service_path(path);
        let Some((_, host)) = self.inner.services.hosts.remove(&path) else {
            return Ok(false);
        };
        host.registry.stop(CloseStatusCode::Away.as_u16(), "").await?;
        tracing::info!(path = %path, "WebSocket service removed");
        Ok(true)
    }

    /// Registry of the service at `path`.
    pub fn service(&self, path: &str) -> Option<SessionRegistry> {
        self.inner.services.host(&service_path(path)).map(|host| host.registry.clone())
    }

    pub fn service_paths(&self) -> Vec<String> {
        self.inner.services.hosts.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Start the services and begin listening.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if matches!(*state, ServerState::Start | ServerState::ShuttingDown) {
            return Ok(());
        }

        let services = self.inner.services.all();
        for host in &services {
            host.registry.start();
        }

        let dispatch = Arc::new(Dispatch {
            services: Arc::clone(&self.inner.services),
        });
        if let Err(e) = self.inner.manager.add_prefix(&self.inner.prefix, dispatch).await {
            tracing::error!(prefix = %self.inner.prefix, error = %e, "The listener has failed to start");
            for host in &services {
                let _ = host.registry.stop(CloseStatusCode::ServerError.as_u16(), "").await;
            }
            return Err(e);
        }

        self.watch_failures();
        *state = ServerState::Start;
        tracing::info!(prefix = %self.inner.prefix, services = services.len(), "Server started");
        Ok(())
    }

    /// Close every session with 1001 and stop listening.
    pub async fn stop(&self) {
        self.shutdown(CloseStatusCode::Away, "Server stopped").await;
    }

    async fn abort(&self) {
        self.shutdown(CloseStatusCode::Abnormal, "Server aborted").await;
    }

    async fn shutdown(&self, code: CloseStatusCode, message: &'static str) {
        let mut state = self.inner.state.lock().await;
        if *state != ServerState::Start {
            return;
        }
        *state = ServerState::ShuttingDown;

        for host in self.inner.services.all() {
            if let Err(e) = host.registry.stop(code.as_u16(), "").await {
                tracing::error!(error = %e, "Failed to stop a service");
            }
        }
        let watch = self
            .inner
            .failure_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = watch {
            task.abort();
        }
        self.inner.manager.close_all().await;

        *state = ServerState::Stop;
        tracing::info!(prefix = %self.inner.prefix, code = code.as_u16(), "{}", message);
    }

    fn watch_failures(&self) {
        let mut failures = self.inner.manager.subscribe_failures();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            if let Ok(addr) = failures.recv().await {
                if let Some(inner) = weak.upgrade() {
                    tracing::error!(address = %addr, "Endpoint failed, aborting server");
                    HttpServer { inner }.abort().await;
                }
            }
        });
        if let Some(previous) = self
            .inner
            .failure_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }
    }
}

fn can_configure(state: ServerState) -> bool {
    matches!(state, ServerState::Ready | ServerState::Stop)
}
