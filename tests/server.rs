//! Server-level integration tests: policy hooks and connection limits

mod common;

use common::client::{connect, greet, read_reply, read_to_close, request_frame};
use common::{create_test_listener, default_handler, start_server, CountingObserver};
use socksd::socks::consts::*;
use socksd::socks::Verdict;
use socksd::ReplyCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_denied_request_gets_not_allowed() {
    let (_target, target_addr) = create_test_listener().await;
    let observer = Arc::new(CountingObserver::new(Some(Verdict::Deny)));
    let server = start_server(default_handler().with_observer(observer.clone()), None).await;

    let mut client = connect(server.addr).await;
    client
        .write_all(&request_frame(SOCKS5_CMD_TCP_CONNECT, target_addr))
        .await
        .unwrap();

    let (code, _) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::ConnectionNotAllowed);
    assert!(read_to_close(&mut client).await.is_empty());
    assert_eq!(observer.requests(), 1);
}

#[tokio::test]
async fn test_undecided_observer_denies() {
    let (_target, target_addr) = create_test_listener().await;
    let observer = Arc::new(CountingObserver::new(None));
    let server = start_server(default_handler().with_observer(observer), None).await;

    let mut client = connect(server.addr).await;
    client
        .write_all(&request_frame(SOCKS5_CMD_TCP_CONNECT, target_addr))
        .await
        .unwrap();

    let (code, _) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::ConnectionNotAllowed);
}

#[tokio::test]
async fn test_intercepted_stream_reaches_observer() {
    let (target, target_addr) = create_test_listener().await;
    let observer = Arc::new(CountingObserver::new(Some(Verdict::Accept {
        intercept: true,
    })));
    let server = start_server(default_handler().with_observer(observer), None).await;

    let mut client = connect(server.addr).await;
    // Payload pipelined with the request must survive the hand-over
    let mut frame = request_frame(SOCKS5_CMD_TCP_CONNECT, target_addr);
    frame.extend_from_slice(b"hello");
    client.write_all(&frame).await.unwrap();

    let (code, bound) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::Succeeded);
    assert_eq!(bound, "0.0.0.0:0".parse::<SocketAddr>().unwrap());

    let echoed = read_to_close(&mut client).await;
    assert_eq!(echoed, b"intercepted:hello");

    // The destination was never dialed
    let accepted = tokio::time::timeout(Duration::from_millis(100), target.accept()).await;
    assert!(accepted.is_err());
}

#[tokio::test]
async fn test_udp_associate_not_supported() {
    let server = start_server(default_handler(), None).await;

    let mut client = connect(server.addr).await;
    client
        .write_all(&request_frame(
            SOCKS5_CMD_UDP_ASSOCIATE,
            "0.0.0.0:0".parse().unwrap(),
        ))
        .await
        .unwrap();

    let (code, _) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::CommandNotSupported);
    assert!(read_to_close(&mut client).await.is_empty());
}

#[tokio::test]
async fn test_max_connections_ceiling() {
    let server = start_server(default_handler(), Some(2)).await;

    let mut first = connect(server.addr).await;
    let _second = connect(server.addr).await;
    assert_eq!(server.server.active_connections(), 2);

    // Over the ceiling: closed before any protocol bytes
    let mut third = TcpStream::connect(server.addr).await.unwrap();
    let _ = third.write_all(&[SOCKS5_VERSION, 0x01, 0x00]).await;
    assert!(read_to_close(&mut third).await.is_empty());

    // A slot frees up once a client leaves
    first.shutdown().await.unwrap();
    let mut buf = [0u8; 1];
    let _ = first.read(&mut buf).await;
    drop(first);

    for _ in 0..100 {
        if server.server.active_connections() < 2 {
            let mut fourth = TcpStream::connect(server.addr).await.unwrap();
            assert_eq!(
                greet(&mut fourth, &[SOCKS5_AUTH_METHOD_NONE]).await,
                [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection slot was never released");
}
