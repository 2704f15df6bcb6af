//! CONNECT and BIND over the TLS listener

#![cfg(feature = "rustls-tls")]

mod common;

use common::client::{bind_frame, greet, read_reply, request_frame};
use common::{
    bind_options, create_test_listener, default_handler, no_auth_registry, start_server_on,
    TestServer,
};
use socksd::config::TlsConfig;
use socksd::socks::consts::*;
use socksd::socks::ConnectionHandler;
use socksd::transport::{SocketOpts, TlsTransport};
use socksd::ReplyCode;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

const GREETING: &[u8] = b"hello from the node.js proxy server!";
const RESPONSE: &[u8] = b"nice to meet you! ;-)";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

async fn start_tls_server(handler: ConnectionHandler) -> TestServer {
    let config = TlsConfig {
        cert: fixture("server.crt"),
        key: fixture("server.key"),
    };
    let addr = "127.0.0.1:0".parse().unwrap();
    let transport = TlsTransport::bind(addr, &config, SocketOpts::default())
        .await
        .unwrap();
    start_server_on(Box::new(transport), handler, None)
}

/// Client trusting only the fixture certificate
fn connector() -> TlsConnector {
    let mut reader = BufReader::new(File::open(fixture("server.crt")).unwrap());
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn tls_connect(server: SocketAddr) -> TlsStream<TcpStream> {
    let tcp = TcpStream::connect(server).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    let mut stream = connector().connect(name, tcp).await.unwrap();
    assert_eq!(
        greet(&mut stream, &[SOCKS5_AUTH_METHOD_NONE]).await,
        [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]
    );
    stream
}

#[tokio::test]
async fn test_tls_connect_round_trip() {
    let (target, target_addr) = create_test_listener().await;
    let destination = tokio::spawn(async move {
        let (mut stream, _) = target.accept().await.unwrap();
        stream.write_all(GREETING).await.unwrap();
        let mut buf = vec![0u8; RESPONSE.len()];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    });

    let server = start_tls_server(default_handler()).await;
    let mut client = tls_connect(server.addr).await;
    client
        .write_all(&request_frame(SOCKS5_CMD_TCP_CONNECT, target_addr))
        .await
        .unwrap();

    let (code, _) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::Succeeded);

    let mut buf = vec![0u8; GREETING.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, GREETING);

    client.write_all(RESPONSE).await.unwrap();
    assert_eq!(destination.await.unwrap(), RESPONSE);
}

#[tokio::test]
async fn test_tls_bind_round_trip() {
    let handler =
        ConnectionHandler::new(no_auth_registry(), bind_options(Duration::from_millis(3000)));
    let server = start_tls_server(handler).await;

    let mut client = tls_connect(server.addr).await;
    client.write_all(&bind_frame(0)).await.unwrap();
    let (code, announced) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::Succeeded);

    // The peer side of a BIND is plain TCP
    let mut peer = TcpStream::connect(announced).await.unwrap();
    let (code, remote) = read_reply(&mut client).await;
    assert_eq!(code, ReplyCode::Succeeded);
    assert_eq!(remote, peer.local_addr().unwrap());

    peer.write_all(GREETING).await.unwrap();
    let mut buf = vec![0u8; GREETING.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, GREETING);

    client.write_all(RESPONSE).await.unwrap();
    let mut buf = vec![0u8; RESPONSE.len()];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, RESPONSE);
}
