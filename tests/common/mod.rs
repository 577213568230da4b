//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use ws_engine::net::{ConnectionSettings, EndpointOptions};
use ws_engine::{Handler, RequestContext};

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn local(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Endpoint options with short timeouts for tests.
pub fn fast_options(first_request: Duration, reuse: Duration) -> EndpointOptions {
    EndpointOptions {
        connection: Arc::new(ConnectionSettings {
            first_request_timeout: first_request,
            reuse_timeout: reuse,
            ..ConnectionSettings::default()
        }),
        ..EndpointOptions::default()
    }
}

/// Replies `<label>|<path>|<body>`.
pub struct Echo(pub &'static str);

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, ctx: &mut RequestContext<'_>) -> ws_engine::Result<()> {
        let body = ctx.body().read_to_end().await?;
        let mut reply = format!("{}|{}|", self.0, ctx.request().url().path()).into_bytes();
        reply.extend_from_slice(&body);
        ctx.send(&reply).await
    }
}

/// Read everything the peer sends until it closes or goes quiet.
pub async fn read_until_quiet<R: AsyncRead + Unpin>(reader: &mut R, quiet: Duration) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(quiet, reader.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Read one response head and a `Content-Length` body.
pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> (String, String) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        reader.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let len = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.unwrap();
    (head, String::from_utf8(body).unwrap())
}

/// Self-signed CA plus a `localhost` leaf it issued, as
/// `(ca_der, leaf_pem, leaf_key_pem)`.
pub fn test_certificates() -> (Vec<u8>, String, String) {
    let mut ca_params = rcgen::CertificateParams::new(Vec::new());
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "ws-engine test CA");
    let ca = rcgen::Certificate::from_params(ca_params).unwrap();

    let leaf = rcgen::Certificate::from_params(rcgen::CertificateParams::new(vec!["localhost".to_string()])).unwrap();
    let leaf_pem = leaf.serialize_pem_with_signer(&ca).unwrap();
    (ca.serialize_der().unwrap(), leaf_pem, leaf.serialize_private_key_pem())
}
