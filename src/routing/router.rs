//! Prefix table and request routing.
//!
//! # Responsibilities
//! - Store registered prefixes in three lists: concrete, `+` and `*`
//! - Look up the handler for a request URL by longest path prefix
//! - Reject a prefix already owned by another handler
//!
//! # Design Decisions
//! - Lists are immutable snapshots behind `ArcSwap`; writers copy, modify
//!   and compare-and-swap, retrying on contention
//! - The read path never locks
//! - Owner identity is pointer identity of the handler `Arc`
//! - Concrete prefixes are keyed by their normalized string, wildcard
//!   prefixes by path alone

use std::sync::Arc;

use arc_swap::ArcSwap;
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::routing::prefix::{HostKind, ListenerPrefix};

/// A prefix and the handler that owns it.
pub struct Route<H: ?Sized> {
    pub prefix: ListenerPrefix,
    pub handler: Arc<H>,
}

impl<H: ?Sized> Clone for Route<H> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

type Routes<H> = Vec<Route<H>>;

/// Routing table for one endpoint.
pub struct Router<H: ?Sized> {
    prefixes: ArcSwap<Routes<H>>,
    all: ArcSwap<Routes<H>>,
    unhandled: ArcSwap<Routes<H>>,
}

impl<H: ?Sized> Router<H> {
    pub fn new() -> Self {
        Self {
            prefixes: ArcSwap::from_pointee(Vec::new()),
            all: ArcSwap::from_pointee(Vec::new()),
            unhandled: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn list(&self, kind: HostKind) -> &ArcSwap<Routes<H>> {
        match kind {
            HostKind::All => &self.all,
            HostKind::Unhandled => &self.unhandled,
            HostKind::Dns | HostKind::Ip => &self.prefixes,
        }
    }

    /// Register `prefix` for `handler`.
    ///
    /// Re-adding a prefix the same handler already owns is a no-op.
    pub fn add(&self, prefix: ListenerPrefix, handler: Arc<H>) -> Result<()> {
        let special = matches!(prefix.host_kind(), HostKind::All | HostKind::Unhandled);
        let list = self.list(prefix.host_kind());

        loop {
            let current = list.load_full();
            let existing = current.iter().find(|r| {
                if special {
                    r.prefix.path() == prefix.path()
                } else {
                    r.prefix == prefix
                }
            });
            if let Some(route) = existing {
                if special || !Arc::ptr_eq(&route.handler, &handler) {
                    return Err(Error::DuplicatePrefix(prefix.to_string()));
                }
                return Ok(());
            }

            let mut future = Vec::with_capacity(current.len() + 1);
            future.extend(current.iter().cloned());
            future.push(Route {
                prefix: prefix.clone(),
                handler: Arc::clone(&handler),
            });

            let previous = list.compare_and_swap(&current, Arc::new(future));
            if Arc::ptr_eq(&*previous, &current) {
                tracing::debug!(prefix = %prefix, "Prefix added");
                return Ok(());
            }
        }
    }

    /// Unregister `prefix`. Returns whether anything was removed.
    pub fn remove(&self, prefix: &ListenerPrefix) -> bool {
        let special = matches!(prefix.host_kind(), HostKind::All | HostKind::Unhandled);
        let list = self.list(prefix.host_kind());

        loop {
            let current = list.load_full();
            let Some(idx) = current.iter().position(|r| {
                if special {
                    r.prefix.path() == prefix.path()
                } else {
                    r.prefix == *prefix
                }
            }) else {
                return false;
            };

            let mut future: Routes<H> = current.as_ref().clone();
            future.remove(idx);

            let previous = list.compare_and_swap(&current, Arc::new(future));
            if Arc::ptr_eq(&*previous, &current) {
                tracing::debug!(prefix = %prefix, "Prefix removed");
                return true;
            }
        }
    }

    /// True when no prefix of any kind is registered.
    pub fn is_empty(&self) -> bool {
        self.prefixes.load().is_empty() && self.all.load().is_empty() && self.unhandled.load().is_empty()
    }

    /// Every registered prefix, concrete first.
    pub fn prefixes(&self) -> Vec<ListenerPrefix> {
        [&self.prefixes, &self.unhandled, &self.all]
            .into_iter()
            .flat_map(|list| list.load().iter().map(|r| r.prefix.clone()).collect::<Vec<_>>())
            .collect()
    }

    /// Find the handler for `url`.
    ///
    /// Concrete prefixes are tried first: a DNS request host must equal a
    /// DNS prefix host, the port must match and the longest path wins (the
    /// later entry on ties). Then the `*` list, then the `+` list, by path
    /// alone.
    pub fn resolve(&self, url: &Url) -> Option<Route<H>> {
        let path = request_path(url);

        if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
            let dns = matches!(url.host(), Some(Host::Domain(_)));
            let port = url.port_or_known_default();

            let prefixes = self.prefixes.load();
            let mut best: Option<&Route<H>> = None;
            let mut best_len = 0usize;
            for route in prefixes.iter() {
                let prefix = &route.prefix;
                if dns && prefix.host_kind() == HostKind::Dns && prefix.host() != host {
                    continue;
                }
                if Some(prefix.port()) != port {
                    continue;
                }
                let len = prefix.path().len();
                if (best.is_none() || len >= best_len) && path.starts_with(prefix.path()) {
                    best = Some(route);
                    best_len = len;
                }
            }
            if let Some(route) = best {
                return Some(route.clone());
            }
        }

        let unhandled = self.unhandled.load();
        if let Some(route) = search_special(&path, unhandled.as_slice()) {
            return Some(route);
        }
        let all = self.all.load();
        search_special(&path, all.as_slice())
    }
}

impl<H: ?Sized> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn search_special<H: ?Sized>(path: &str, routes: &[Route<H>]) -> Option<Route<H>> {
    let mut best: Option<&Route<H>> = None;
    let mut best_len = 0usize;
    for route in routes {
        let len = route.prefix.path().len();
        if (best.is_none() || len >= best_len) && path.starts_with(route.prefix.path()) {
            best = Some(route);
            best_len = len;
        }
    }
    best.cloned()
}

/// Percent-decoded request path with a trailing `/`.
pub(crate) fn request_path(url: &Url) -> String {
    let raw = url.path();
    let mut path = urlencoding::decode(raw)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> ListenerPrefix {
        ListenerPrefix::parse(s).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn resolved(router: &Router<str>, u: &str) -> Option<String> {
        router.resolve(&url(u)).map(|r| r.handler.to_string())
    }

    #[test]
    fn longest_prefix_wins() {
        let router: Router<str> = Router::new();
        router.add(prefix("http://localhost:8080/"), Arc::from("root")).unwrap();
        router.add(prefix("http://localhost:8080/chat/"), Arc::from("chat")).unwrap();
        router.add(prefix("http://localhost:8080/chat/room/"), Arc::from("room")).unwrap();

        assert_eq!(resolved(&router, "http://localhost:8080/chat/room/1").as_deref(), Some("room"));
        assert_eq!(resolved(&router, "http://localhost:8080/chat").as_deref(), Some("chat"));
        assert_eq!(resolved(&router, "http://localhost:8080/other").as_deref(), Some("root"));
    }

    #[test]
    fn dns_hosts_must_match_and_ports_are_exact() {
        let router: Router<str> = Router::new();
        router.add(prefix("http://example.com:8080/"), Arc::from("example")).unwrap();

        assert!(resolved(&router, "http://other.org:8080/").is_none());
        assert!(resolved(&router, "http://example.com:8081/").is_none());
        // An IP request host is not compared against a DNS prefix host.
        assert_eq!(resolved(&router, "http://127.0.0.1:8080/").as_deref(), Some("example"));
    }

    #[test]
    fn decodes_path_before_matching() {
        let router: Router<str> = Router::new();
        router.add(prefix("http://localhost/a b/"), Arc::from("spaced")).unwrap();
        assert_eq!(resolved(&router, "http://localhost/a%20b").as_deref(), Some("spaced"));
    }

    #[test]
    fn falls_back_to_unhandled_then_all() {
        let router: Router<str> = Router::new();
        router.add(prefix("http://+:8080/"), Arc::from("all")).unwrap();
        assert_eq!(resolved(&router, "http://anything:9999/x").as_deref(), Some("all"));

        router.add(prefix("http://*:8080/"), Arc::from("star")).unwrap();
        assert_eq!(resolved(&router, "http://anything:9999/x").as_deref(), Some("star"));

        router.add(prefix("http://localhost:8080/x/"), Arc::from("concrete")).unwrap();
        assert_eq!(resolved(&router, "http://localhost:8080/x/y").as_deref(), Some("concrete"));
    }

    #[test]
    fn duplicate_prefixes() {
        let router: Router<str> = Router::new();
        let owner: Arc<str> = Arc::from("a");
        router.add(prefix("http://localhost/p/"), Arc::clone(&owner)).unwrap();
        router.add(prefix("http://localhost/p/"), Arc::clone(&owner)).unwrap();
        assert_eq!(router.prefixes().len(), 1);

        let err = router.add(prefix("http://LOCALHOST:80/p/"), Arc::from("b")).unwrap_err();
        assert!(matches!(err, Error::DuplicatePrefix(_)));

        router.add(prefix("http://*:80/w/"), Arc::clone(&owner)).unwrap();
        assert!(matches!(
            router.add(prefix("http://*:81/w/"), Arc::clone(&owner)),
            Err(Error::DuplicatePrefix(_))
        ));
    }

    #[test]
    fn remove_empties_table() {
        let router: Router<str> = Router::new();
        let p = prefix("http://localhost/p/");
        let w = prefix("http://+:80/");
        router.add(p.clone(), Arc::from("a")).unwrap();
        router.add(w.clone(), Arc::from("b")).unwrap();
        assert!(!router.is_empty());

        assert!(router.remove(&p));
        assert!(!router.remove(&p));
        assert!(!router.is_empty());
        assert!(router.remove(&w));
        assert!(router.is_empty());
        assert!(resolved(&router, "http://localhost/p/").is_none());
    }

    #[test]
    fn concurrent_adds_and_removes_converge() {
        let router: Arc<Router<str>> = Arc::new(Router::new());
        let owner: Arc<str> = Arc::from("owner");

        std::thread::scope(|scope| {
            for t in 0..8 {
                let router = Arc::clone(&router);
                let owner = Arc::clone(&owner);
                scope.spawn(move || {
                    for i in 0..50 {
                        let p = prefix(&format!("http://localhost:8080/t{t}/p{i}/"));
                        router.add(p.clone(), Arc::clone(&owner)).unwrap();
                        if i % 2 == 0 {
                            assert!(router.remove(&p));
                        }
                    }
                });
            }
        });

        let mut remaining: Vec<String> = router.prefixes().iter().map(|p| p.to_string()).collect();
        remaining.sort();
        let mut expected: Vec<String> = (0..8)
            .flat_map(|t| {
                (0..50)
                    .filter(|i| i % 2 == 1)
                    .map(move |i| format!("http://localhost:8080/t{t}/p{i}/"))
            })
            .collect();
        expected.sort();
        assert_eq!(remaining, expected);
    }
}
