//! Endpoint listener with backpressure.
//!
//! # Responsibilities
//! - Bind one socket per endpoint address (backlog 500, optional reuse)
//! - Accept connections, wrapping them in TLS for secure endpoints
//! - Enforce `max_connections` via a semaphore
//! - Own the prefix router shared by the endpoint's connections
//! - Track open connections so closing the endpoint closes them all
//!
//! # Design Decisions
//! - Each accepted socket is served on its own task so the next accept is
//!   re-armed first
//! - An accept failure ends the loop and closes the endpoint
//! - The task serving a connection removes it from the open set when the
//!   connection finishes

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::http::handler::Handler;
use crate::http::request::ConnectionInfo;
use crate::net::connection::{Connection, ConnectionHandle, ConnectionId, ConnectionSettings};
use crate::net::manager::EndpointManager;
use crate::net::tls::{resolve_certificate, CertificateProvider, FolderCertificateProvider, ServerCertificate};
use crate::net::transport::BoxedTransport;
use crate::routing::{ListenerPrefix, Router};

const BACKLOG: u32 = 500;

/// Settings shared by every endpoint of a manager.
#[derive(Clone)]
pub struct EndpointOptions {
    pub reuse_address: bool,
    pub max_connections: usize,
    pub connection: Arc<ConnectionSettings>,
    pub certificates: Arc<dyn CertificateProvider>,
    /// Used for secure endpoints without a per-port certificate pair.
    pub certificate: Option<ServerCertificate>,
}

impl EndpointOptions {
    /// Build options from the engine config, loading the explicit
    /// certificate if one is configured.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let certificate = match &config.server.tls {
            Some(tls) => Some(ServerCertificate::from_pem_files(&tls.cert_path, &tls.key_path)?),
            None => None,
        };
        Ok(Self {
            reuse_address: config.server.reuse_address,
            max_connections: config.server.max_connections,
            connection: Arc::new(ConnectionSettings::from(&config.connection)),
            certificates: Arc::new(FolderCertificateProvider::from_config(
                config.server.certificate_folder.as_deref(),
            )),
            certificate,
        })
    }
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            reuse_address: false,
            max_connections: 10_000,
            connection: Arc::new(ConnectionSettings::default()),
            certificates: Arc::new(FolderCertificateProvider::from_config(None)),
            certificate: None,
        }
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// One bound socket and the prefixes served on it.
pub struct EndpointListener {
    local_addr: SocketAddr,
    secure: bool,
    router: Arc<Router<dyn Handler>>,
    settings: Arc<ConnectionSettings>,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    connection_limit: Arc<Semaphore>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    manager: Weak<EndpointManager>,
}

impl EndpointListener {
    /// Bind `addr` and start accepting.
    ///
    /// Secure endpoints resolve their certificate here; a missing
    /// certificate fails the bind.
    pub fn bind(
        addr: SocketAddr,
        secure: bool,
        options: &EndpointOptions,
        manager: Weak<EndpointManager>,
    ) -> Result<Arc<Self>> {
        let tls = if secure {
            let cert = resolve_certificate(
                options.certificates.as_ref(),
                addr.port(),
                options.certificate.as_ref(),
            )?;
            Some(cert.acceptor()?)
        } else {
            None
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if options.reuse_address {
            socket.set_reuseaddr(true)?;
        }
        socket.bind(addr)?;
        let listener = socket.listen(BACKLOG)?;
        let local_addr = listener.local_addr()?;

        let connection_limit = Arc::new(Semaphore::new(options.max_connections));
        let endpoint = Arc::new(Self {
            local_addr,
            secure,
            router: Arc::new(Router::new()),
            settings: Arc::clone(&options.connection),
            connections: DashMap::new(),
            connection_limit: Arc::clone(&connection_limit),
            accept_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            manager,
        });

        tracing::info!(
            address = %local_addr,
            secure,
            max_connections = options.max_connections,
            "Endpoint bound"
        );

        let task = tokio::spawn(accept_loop(Arc::downgrade(&endpoint), listener, tls, connection_limit));
        *endpoint.accept_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(endpoint)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> &Router<dyn Handler> {
        &self.router
    }

    /// Open connections, including ones waiting for their next request.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn add_prefix(&self, prefix: ListenerPrefix, handler: Arc<dyn Handler>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidState("the endpoint has been closed"));
        }
        self.router.add(prefix, handler)
    }

    /// Remove `prefix`; the endpoint closes once no prefix is left.
    pub async fn remove_prefix(&self, prefix: &ListenerPrefix) -> bool {
        let removed = self.router.remove(prefix);
        if self.router.is_empty() {
            self.close().await;
        }
        removed
    }

    /// Stop accepting, close every open connection and deregister.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }

        let open: Vec<_> = self.connections.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.connections.clear();
        for conn in &open {
            conn.close().await;
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.remove_endpoint(self);
        }
        tracing::info!(address = %self.local_addr, closed_connections = open.len(), "Endpoint closed");
    }

    async fn serve(self: Arc<Self>, stream: TcpStream, peer: SocketAddr, tls: Option<TlsAcceptor>, permit: ConnectionPermit) {
        let _permit = permit;
        let _ = stream.set_nodelay(true);
        let local_addr = stream.local_addr().unwrap_or(self.local_addr);

        let io: BoxedTransport = match tls {
            Some(acceptor) => {
                let handshake = tokio::time::timeout(self.settings.first_request_timeout, acceptor.accept(stream));
                match handshake.await {
                    Ok(Ok(stream)) => Box::new(stream),
                    Ok(Err(e)) => {
                        tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        tracing::debug!(peer_addr = %peer, "TLS handshake timed out");
                        return;
                    }
                }
            }
            None => Box::new(stream),
        };

        let info = ConnectionInfo {
            local_addr,
            remote_addr: peer,
            secure: self.secure,
        };
        let conn = Connection::new(io, info, Arc::clone(&self.settings), Arc::clone(&self.router));
        let handle = conn.handle();
        let id = handle.id();
        self.connections.insert(id, Arc::clone(&handle));
        if self.is_closed() {
            handle.close().await;
        }

        conn.run().await;
        self.connections.remove(&id);
    }
}

async fn accept_loop(
    endpoint: Weak<EndpointListener>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    connection_limit: Arc<Semaphore>,
) {
    loop {
        // Acquire permit first (backpressure)
        let Ok(permit) = Arc::clone(&connection_limit).acquire_owned().await else {
            return;
        };
        let accepted = listener.accept().await;
        let Some(endpoint) = endpoint.upgrade() else {
            return;
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(
                    peer_addr = %peer,
                    available_permits = connection_limit.available_permits(),
                    "Connection accepted"
                );
                let permit = ConnectionPermit { _permit: permit };
                tokio::spawn(Arc::clone(&endpoint).serve(stream, peer, tls.clone(), permit));
            }
            Err(e) => {
                if !endpoint.is_closed() {
                    tracing::error!(address = %endpoint.local_addr, error = %e, "Accept failed");
                    if let Some(manager) = endpoint.manager.upgrade() {
                        manager.report_failure(endpoint.local_addr);
                    }
                }
                tokio::spawn(async move { endpoint.close().await });
                return;
            }
        }
    }
}
