//! Request handler seam.
//!
//! # Responsibilities
//! - Define the `Handler` trait registered against listening prefixes
//! - Give handlers the request, its body and a way to respond
//! - Let a handler take over the raw transport (protocol upgrade)
//!
//! # Design Decisions
//! - One response per request; a second send is an error
//! - A handler that returns without responding gets an empty 200
//! - The upgrade callback runs on its own task after the engine has
//!   released the connection

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::StatusCode;

use crate::error::{Error, Result};
use crate::http::body::RequestBody;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::connection::ConnectionHandle;
use crate::net::transport::BoxedTransport;

/// Handles requests routed to a prefix.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<()>;
}

/// A transport released by the engine after an upgrade.
pub struct Upgraded {
    /// The reunited client stream.
    pub io: BoxedTransport,
    /// Bytes the client sent past the request head that the engine had
    /// already buffered.
    pub leftover: Vec<u8>,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

pub(crate) type UpgradeFn = Box<dyn FnOnce(Upgraded) -> BoxFuture<'static, ()> + Send>;

/// Everything a handler sees for one request.
pub struct RequestContext<'a> {
    request: Request,
    body: RequestBody<'a>,
    response: Response,
    conn: Arc<ConnectionHandle>,
    keep_alive: bool,
    responded: bool,
    failed: bool,
    upgrade: Option<UpgradeFn>,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(
        request: Request,
        body: RequestBody<'a>,
        conn: Arc<ConnectionHandle>,
        keep_alive: bool,
    ) -> Self {
        Self {
            request,
            body,
            response: Response::new(),
            conn,
            keep_alive,
            responded: false,
            failed: false,
            upgrade: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn body(&mut self) -> &mut RequestBody<'a> {
        &mut self.body
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn is_responded(&self) -> bool {
        self.responded
    }

    /// Write the response head and `body`.
    pub async fn send(&mut self, body: &[u8]) -> Result<()> {
        if self.responded {
            return Err(Error::InvalidState("the response has already been sent"));
        }
        if self.upgrade.is_some() {
            return Err(Error::InvalidState("the connection has been upgraded"));
        }
        if !self.keep_alive {
            self.response.set_close_connection(true);
        }
        self.responded = true;
        let sent = self.conn.send_response(&self.response, body).await;
        if sent.is_err() {
            self.failed = true;
        }
        sent
    }

    /// Respond with `status` and an empty body.
    pub async fn send_status(&mut self, status: StatusCode) -> Result<()> {
        self.response.set_status(status);
        self.send(&[]).await
    }

    /// Respond with an HTML error page and close the connection.
    pub async fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<()> {
        let (response, body) = Response::error(status, message);
        self.response = response;
        self.send(&body).await
    }

    /// Take over the transport once the handler returns.
    ///
    /// The callback receives the reunited stream plus any buffered bytes.
    /// No response is written by the engine for this request.
    pub fn upgrade<F, Fut>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(Upgraded) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.responded {
            return Err(Error::InvalidState("the response has already been sent"));
        }
        self.upgrade = Some(Box::new(move |upgraded| callback(upgraded).boxed()));
        Ok(())
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<UpgradeFn> {
        self.upgrade.take()
    }

    /// Whether the engine must close the connection after this request.
    pub(crate) fn should_close(&self) -> bool {
        self.failed || !self.keep_alive || self.response.close_connection()
    }
}
