//! Secure endpoint served with a per-port certificate pair.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use ws_engine::net::{EndpointManager, FolderCertificateProvider};
use ws_engine::Error;

mod common;
use common::{fast_options, free_port, local, read_response, test_certificates, Echo};

fn connector(ca_der: Vec<u8>) -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(CertificateDer::from(ca_der)).unwrap();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn test_https_prefix_uses_port_certificate() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let (ca_der, cert_pem, key_pem) = test_certificates();
    std::fs::write(dir.path().join(format!("{port}.cer")), cert_pem).unwrap();
    std::fs::write(dir.path().join(format!("{port}.key")), key_pem).unwrap();

    let mut options = fast_options(Duration::from_secs(5), Duration::from_secs(5));
    options.certificates = Arc::new(FolderCertificateProvider::new(dir.path()));
    let manager = EndpointManager::new(options);
    manager
        .add_prefix(&format!("https://127.0.0.1:{port}/secure/"), Arc::new(Echo("tls")))
        .await
        .unwrap();

    let tcp = TcpStream::connect(local(port)).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector(ca_der).connect(server_name, tcp).await.unwrap();

    tls.write_all(b"POST /secure/echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\n\r\nping")
        .await
        .unwrap();
    let (head, body) = read_response(&mut tls).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, "tls|/secure/echo|ping");

    manager.close_all().await;
}

#[tokio::test]
async fn test_https_prefix_without_certificate_fails() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let mut options = fast_options(Duration::from_secs(5), Duration::from_secs(5));
    options.certificates = Arc::new(FolderCertificateProvider::new(dir.path()));
    let manager = EndpointManager::new(options);

    let err = manager
        .add_prefix(&format!("https://127.0.0.1:{port}/"), Arc::new(Echo("tls")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CertificateMissing(p) if p == port));
    assert!(manager.endpoints().is_empty());
}
