//! Exercises `HfpTransport` against a minimal hand-rolled HTTP/1.1 server,
//! driving a real `/userid` handshake followed by a register read over an
//! actual socket rather than mocking the transport's internals.

use std::time::Duration;

use fleetlink_core::hfp::{HfpConfig, HfpTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn serve_one(listener: &TcpListener, status: u16, body: &str) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = vec![0u8; 8192];
    let mut total = 0;
    loop {
        let n = stream.read(&mut buf[total..]).await.unwrap();
        total += n;
        if buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let response = format!(
        "HTTP/1.1 {status} OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
}

fn config(port: u16) -> HfpConfig {
    HfpConfig {
        port,
        username: "admin".into(),
        password: "secret".into(),
        timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn resync_then_read_register_round_trips_over_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        serve_one(&listener, 200, "result=OK&time=100&userid=1").await;
        serve_one(&listener, 200, "result=OK&device_type=7").await;
    });

    let transport = HfpTransport::new("127.0.0.1".into(), config(port));
    transport.resync().await.expect("userid handshake succeeds");

    let desc = fleetlink_core::register_table().lookup("device_type").unwrap();
    let value = transport.read_register(desc, Some(3)).await.unwrap();
    assert_eq!(value.as_int(), Some(7));

    server.await.unwrap();
}

#[tokio::test]
async fn failed_auth_response_surfaces_as_auth_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        serve_one(&listener, 200, "result=ERR_AUTH").await;
    });

    let transport = HfpTransport::new("127.0.0.1".into(), config(port));
    let err = transport.resync().await.unwrap_err();
    assert!(matches!(err, fleetlink_core::FleetError::AuthFailed));

    server.await.unwrap();
}
