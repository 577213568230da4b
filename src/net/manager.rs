//! Registry of bound endpoints.
//!
//! # Responsibilities
//! - Parse prefix strings and resolve the address to bind for them
//! - Create one `EndpointListener` per address, lazily
//! - Forget endpoints once they close
//! - Report endpoints whose accept loop failed

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::http::handler::Handler;
use crate::net::listener::{EndpointListener, EndpointOptions};
use crate::routing::ListenerPrefix;

pub struct EndpointManager {
    endpoints: DashMap<SocketAddr, Arc<EndpointListener>>,
    options: EndpointOptions,
    failures: broadcast::Sender<SocketAddr>,
}

impl EndpointManager {
    pub fn new(options: EndpointOptions) -> Arc<Self> {
        let (failures, _) = broadcast::channel(16);
        Arc::new(Self {
            endpoints: DashMap::new(),
            options,
            failures,
        })
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    /// Register `handler` for `prefix`, binding its endpoint if needed.
    pub async fn add_prefix(self: &Arc<Self>, prefix: &str, handler: Arc<dyn Handler>) -> Result<ListenerPrefix> {
        let prefix = ListenerPrefix::parse(prefix)?;
        let addr = resolve_address(&prefix).await?;

        let endpoint = match self.endpoints.entry(addr) {
            Entry::Occupied(entry) => {
                let endpoint = Arc::clone(entry.get());
                if endpoint.is_secure() != prefix.is_secure() {
                    return Err(Error::InvalidPrefix {
                        prefix: prefix.to_string(),
                        reason: "the endpoint is already bound with another scheme",
                    });
                }
                endpoint
            }
            Entry::Vacant(entry) => {
                let endpoint = EndpointListener::bind(addr, prefix.is_secure(), &self.options, Arc::downgrade(self))?;
                entry.insert(Arc::clone(&endpoint));
                endpoint
            }
        };

        endpoint.add_prefix(prefix.clone(), handler)?;
        Ok(prefix)
    }

    /// Unregister `prefix`. Returns whether it was registered.
    pub async fn remove_prefix(&self, prefix: &str) -> Result<bool> {
        let prefix = ListenerPrefix::parse(prefix)?;
        let addr = resolve_address(&prefix).await?;
        let endpoint = self.endpoints.get(&addr).map(|entry| Arc::clone(entry.value()));
        match endpoint {
            Some(endpoint) => Ok(endpoint.remove_prefix(&prefix).await),
            None => Ok(false),
        }
    }

    /// Endpoint bound for `addr`.
    pub fn endpoint(&self, addr: &SocketAddr) -> Option<Arc<EndpointListener>> {
        self.endpoints.get(addr).map(|entry| Arc::clone(entry.value()))
    }

    pub fn endpoints(&self) -> Vec<Arc<EndpointListener>> {
        self.endpoints.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Forget `endpoint` if it is still the one registered for its address.
    pub(crate) fn remove_endpoint(&self, endpoint: &EndpointListener) {
        let key = self
            .endpoints
            .iter()
            .find(|entry| std::ptr::eq(Arc::as_ptr(entry.value()), endpoint))
            .map(|entry| *entry.key());
        if let Some(key) = key {
            self.endpoints
                .remove_if(&key, |_, current| std::ptr::eq(Arc::as_ptr(current), endpoint));
        }
    }

    pub(crate) fn report_failure(&self, addr: SocketAddr) {
        let _ = self.failures.send(addr);
    }

    /// Addresses of endpoints whose accept loop failed.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<SocketAddr> {
        self.failures.subscribe()
    }

    /// Close every endpoint.
    pub async fn close_all(&self) {
        for endpoint in self.endpoints() {
            endpoint.close().await;
        }
        self.endpoints.clear();
    }
}

/// Address to bind for `prefix`.
///
/// `*` and `+` bind every interface; other hosts are IP literals or names
/// resolved through DNS.
pub async fn resolve_address(prefix: &ListenerPrefix) -> Result<SocketAddr> {
    let host = prefix.host();
    let port = prefix.port();
    if host == "*" || host == "+" {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "the host could not be resolved",
        })
}
