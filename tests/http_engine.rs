//! End-to-end tests of endpoints, routing and the connection engine over TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use ws_engine::net::{EndpointManager, EndpointOptions};

mod common;
use common::{fast_options, free_port, local, read_response, read_until_quiet, Echo};

#[tokio::test]
async fn test_keep_alive_serves_pipelined_requests() {
    let port = free_port();
    let manager = EndpointManager::new(EndpointOptions::default());
    manager
        .add_prefix(&format!("http://127.0.0.1:{port}/"), Arc::new(Echo("root")))
        .await
        .unwrap();

    let mut client = TcpStream::connect(local(port)).await.unwrap();
    client
        .write_all(
            b"POST /first HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 6\r\n\r\nalpha!\
              POST /second HTTP/1.1\r\nHost: 127.0.0.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nbeta\r\n0\r\n\r\n",
        )
        .await
        .unwrap();

    let (head, body) = read_response(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: keep-alive\r\n"));
    assert_eq!(body, "root|/first|alpha!");

    let (_, body) = read_response(&mut client).await;
    assert_eq!(body, "root|/second|beta");

    // Third request on the same socket, sent after the first two finished.
    client
        .write_all(b"GET /third HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (head, body) = read_response(&mut client).await;
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(body, "root|/third|");

    manager.close_all().await;
}

#[tokio::test]
async fn test_longest_prefix_wins_and_unknown_path_is_404() {
    let port = free_port();
    let manager = EndpointManager::new(EndpointOptions::default());
    manager
        .add_prefix(&format!("http://127.0.0.1:{port}/api/"), Arc::new(Echo("api")))
        .await
        .unwrap();
    manager
        .add_prefix(&format!("http://127.0.0.1:{port}/api/v2/"), Arc::new(Echo("v2")))
        .await
        .unwrap();

    let mut client = TcpStream::connect(local(port)).await.unwrap();
    client
        .write_all(b"GET /api/v2/users HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();
    let (_, body) = read_response(&mut client).await;
    assert_eq!(body, "v2|/api/v2/users|");

    client
        .write_all(b"GET /api/v1 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();
    let (_, body) = read_response(&mut client).await;
    assert_eq!(body, "api|/api/v1|");

    let mut client = TcpStream::connect(local(port)).await.unwrap();
    client
        .write_all(b"GET /other HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();
    let output = read_until_quiet(&mut client, Duration::from_secs(1)).await;
    assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"), "{output}");

    manager.close_all().await;
}

#[tokio::test]
async fn test_silent_connection_times_out_with_408() {
    let port = free_port();
    let manager = EndpointManager::new(fast_options(Duration::from_millis(100), Duration::from_millis(100)));
    manager
        .add_prefix(&format!("http://127.0.0.1:{port}/"), Arc::new(Echo("root")))
        .await
        .unwrap();

    let mut client = TcpStream::connect(local(port)).await.unwrap();
    let output = read_until_quiet(&mut client, Duration::from_secs(2)).await;
    assert!(output.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "{output}");
    assert!(output.contains("Connection: close\r\n"));

    manager.close_all().await;
}

#[tokio::test]
async fn test_idle_reused_connection_times_out() {
    let port = free_port();
    let manager = EndpointManager::new(fast_options(Duration::from_secs(5), Duration::from_millis(100)));
    manager
        .add_prefix(&format!("http://127.0.0.1:{port}/"), Arc::new(Echo("root")))
        .await
        .unwrap();

    let mut client = TcpStream::connect(local(port)).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();
    let (head, _) = read_response(&mut client).await;
    assert!(head.contains("Connection: keep-alive\r\n"));

    let output = read_until_quiet(&mut client, Duration::from_secs(2)).await;
    assert!(output.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "{output}");

    manager.close_all().await;
}

#[tokio::test]
async fn test_malformed_requests_get_error_pages() {
    let port = free_port();
    let manager = EndpointManager::new(EndpointOptions::default());
    manager
        .add_prefix(&format!("http://127.0.0.1:{port}/"), Arc::new(Echo("root")))
        .await
        .unwrap();

    let cases: [(&[u8], &str); 3] = [
        (b"GARBAGE\r\n\r\n", "HTTP/1.1 400 Bad Request"),
        (b"POST / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", "HTTP/1.1 411 Length Required"),
        (
            b"POST / HTTP/1.1\r\nHost: 127.0.0.1\r\nTransfer-Encoding: gzip\r\n\r\n",
            "HTTP/1.1 501 Not Implemented",
        ),
    ];
    for (request, expected) in cases {
        let mut client = TcpStream::connect(local(port)).await.unwrap();
        client.write_all(request).await.unwrap();
        let output = read_until_quiet(&mut client, Duration::from_secs(1)).await;
        assert!(output.starts_with(expected), "{output}");
    }

    manager.close_all().await;
}
