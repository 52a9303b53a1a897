//! Exercises `discovery::databus::scan_databus` against a mock BFP device
//! that answers a broadcast scan with a mixed ring: two clean units, a
//! unit-address collision needing renumbering, and the gateway sentinel.

use std::net::IpAddr;
use std::time::Duration;

use fleetlink_core::bfp::envelope::{decrypt, encrypt, parse_key};
use fleetlink_core::bfp::transport::{BfpConfig, BfpTransport};
use fleetlink_core::bfp::{Body, Command, Frame, StartByte};
use fleetlink_core::discovery::databus::scan_databus;
use fleetlink_core::registers::Protocol;
use fleetlink_core::Communicator;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn test_key() -> [u8; 16] {
    parse_key("0123456789abcdef").unwrap()
}

async fn write_frame(stream: &mut TcpStream, key: &[u8; 16], frame: &Frame) {
    let envelope = encrypt(key, &frame.pack());
    stream.write_all(&envelope).await.unwrap();
}

async fn drain_scan_request(stream: &mut TcpStream, key: &[u8; 16]) {
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await.unwrap();
    let len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut ciphertext = vec![0u8; len];
    stream.read_exact(&mut ciphertext).await.unwrap();
    let plaintext = decrypt(key, &ciphertext).unwrap();
    let frame = Frame::unpack(&plaintext).unwrap();
    assert!(matches!(frame.body, Body::ScanReq));
}

fn scan_ack(unit: u16, hardware_id: &str) -> Frame {
    Frame {
        start: StartByte::Ack,
        command: Command::BroadcastScan,
        body: Body::ScanAck {
            unit,
            hardware_id: hardware_id.to_string(),
        },
    }
}

#[tokio::test]
async fn mixed_ring_scan_separates_units_gateway_and_renumber_candidates() {
    let key = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_key = key;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        drain_scan_request(&mut stream, &server_key).await;

        // Two unambiguous units, then an address collision on unit 9
        // (two devices answering with different hardware ids under the
        // same address, which must be flagged for renumbering instead of
        // folded into the fleet), then the gateway sentinel at unit 0.
        for ack in [
            scan_ack(1, "unit-1-hwid"),
            scan_ack(2, "unit-2-hwid"),
            scan_ack(5, "unit-5-hwid"),
            scan_ack(9, "first-claimant"),
            scan_ack(9, "aa-bb-cc"),
            scan_ack(0, "gateway-hwid"),
        ] {
            write_frame(&mut stream, &server_key, &ack).await;
        }

        // Hold the connection open until the scan window elapses.
        tokio::time::sleep(Duration::from_millis(400)).await;
    });

    let bfp = BfpTransport::new(
        IpAddr::from([127, 0, 0, 1]),
        key,
        BfpConfig {
            port,
            timeout: Duration::from_secs(2),
            yield_interval: Duration::from_millis(0),
            scan_timeout: Duration::from_millis(300),
        },
    );
    let comm = Communicator::new(Some(bfp), None, vec![Protocol::Bfp], 5);

    let result = scan_databus(&comm).await.unwrap();

    assert_eq!(result.units, vec![1, 2, 5], "collided unit 9 must not appear as a live unit");
    assert!(result.is_gateway, "unit 0's scan ack must classify as the gateway sentinel");
    assert!(
        result.renumber.iter().any(|id| id == "aa-bb-cc"),
        "the colliding hardware id must be queued for set_unit_address renumbering, got {:?}",
        result.renumber
    );
}
