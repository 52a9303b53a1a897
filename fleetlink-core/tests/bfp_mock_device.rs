//! Exercises `BfpTransport` against a real TCP socket fed by an
//! in-process task that speaks the SAPI envelope and frame formats back,
//! standing in for a device on the wire.

use std::net::IpAddr;
use std::time::Duration;

use fleetlink_core::bfp::envelope::{decrypt, encrypt, parse_key};
use fleetlink_core::bfp::transport::{BfpConfig, BfpTransport, ScanEntry};
use fleetlink_core::bfp::{Body, Command, Frame, StartByte};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn test_key() -> [u8; 16] {
    parse_key("0123456789abcdef").unwrap()
}

fn config(port: u16) -> BfpConfig {
    BfpConfig {
        port,
        timeout: Duration::from_secs(2),
        yield_interval: Duration::from_millis(0),
        scan_timeout: Duration::from_millis(300),
    }
}

/// Reads one envelope off `stream`, decrypts it into a frame, and returns
/// it alongside the raw ciphertext length already consumed.
async fn read_one_frame(stream: &mut tokio::net::TcpStream, key: &[u8; 16]) -> Frame {
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[0..4], b"SAPI");
    let len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut ciphertext = vec![0u8; len];
    stream.read_exact(&mut ciphertext).await.unwrap();
    let plaintext = decrypt(key, &ciphertext).expect("envelope decrypts under the shared key");
    Frame::unpack(&plaintext).unwrap()
}

async fn write_frame(stream: &mut tokio::net::TcpStream, key: &[u8; 16], frame: &Frame) {
    let envelope = encrypt(key, &frame.pack());
    stream.write_all(&envelope).await.unwrap();
}

#[tokio::test]
async fn read_register_roundtrips_through_a_live_socket() {
    let key = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_key = key;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let req = read_one_frame(&mut stream, &server_key).await;
        let (unit, transaction_id) = match req.body {
            Body::ReadReq { unit, transaction_id, .. } => (unit, transaction_id),
            other => panic!("unexpected request body: {other:?}"),
        };
        let ack = Frame {
            start: StartByte::Ack,
            command: Command::Read(0),
            body: Body::ReadAck {
                unit,
                transaction_id,
                register_start: 0,
                register_length: 1,
                data: vec![7],
            },
        };
        write_frame(&mut stream, &server_key, &ack).await;
    });

    let transport = BfpTransport::new(IpAddr::from([127, 0, 0, 1]), key, config(port));
    let desc = fleetlink_core::register_table().lookup("device_type").unwrap();
    let raw = transport.read_register(desc, 3).await.unwrap();
    assert_eq!(raw, vec![7]);
}

#[tokio::test]
async fn scan_classifies_unit_zero_as_gateway() {
    let key = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_key = key;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let req = read_one_frame(&mut stream, &server_key).await;
        assert!(matches!(req.body, Body::ScanReq));

        let gateway_ack = Frame {
            start: StartByte::Ack,
            command: Command::BroadcastScan,
            body: Body::ScanAck {
                unit: 0,
                hardware_id: "1-2-3".into(),
            },
        };
        write_frame(&mut stream, &server_key, &gateway_ack).await;

        let unit_ack = Frame {
            start: StartByte::Ack,
            command: Command::BroadcastScan,
            body: Body::ScanAck {
                unit: 5,
                hardware_id: "4-5-6".into(),
            },
        };
        write_frame(&mut stream, &server_key, &unit_ack).await;

        // Hold the connection open until the scan window elapses.
        tokio::time::sleep(Duration::from_millis(400)).await;
    });

    let transport = BfpTransport::new(IpAddr::from([127, 0, 0, 1]), key, config(port));
    let entries = transport.scan().await.unwrap();
    assert_eq!(entries, vec![ScanEntry::Gateway, ScanEntry::Unit(5)]);
}

#[tokio::test]
async fn set_unit_address_treats_post_write_timeout_as_success() {
    let key = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Accept the request but never answer it; the device applied
        // the change and simply didn't get the ack back out in time.
        let _req = stream.read_u8().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut cfg = config(port);
    cfg.timeout = Duration::from_millis(200);
    let transport = BfpTransport::new(IpAddr::from([127, 0, 0, 1]), key, cfg);
    let result = transport.set_unit_address("1-2-3", 9).await;
    assert!(result.is_ok(), "a timed-out set-address ack must be treated as success");
}
