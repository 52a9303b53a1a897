//! Exercises `bulk::write_all`'s mid-batch re-keying: a successful
//! `idaddr` write must move the device's result entry from its pre-write
//! uid to its post-write uid.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use fleetlink_core::bfp::envelope::{decrypt, encrypt, parse_key};
use fleetlink_core::bfp::transport::{BfpConfig, BfpTransport};
use fleetlink_core::bfp::{Body, Command, Frame, StartByte};
use fleetlink_core::bulk::{self, Bundle};
use fleetlink_core::device::{Device, Variant};
use fleetlink_core::registers::Protocol;
use fleetlink_core::{Communicator, ProgressNode, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn test_key() -> [u8; 16] {
    parse_key("0123456789abcdef").unwrap()
}

async fn read_one_frame(stream: &mut TcpStream, key: &[u8; 16]) -> Frame {
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await.unwrap();
    let len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut ciphertext = vec![0u8; len];
    stream.read_exact(&mut ciphertext).await.unwrap();
    let plaintext = decrypt(key, &ciphertext).unwrap();
    Frame::unpack(&plaintext).unwrap()
}

async fn write_frame(stream: &mut TcpStream, key: &[u8; 16], frame: &Frame) {
    let envelope = encrypt(key, &frame.pack());
    stream.write_all(&envelope).await.unwrap();
}

#[tokio::test]
async fn idaddr_write_rekeys_the_result_map() {
    let key = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_key = key;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let req = read_one_frame(&mut stream, &server_key).await;
        let (unit, transaction_id) = match req.body {
            Body::WriteReq { unit, transaction_id, .. } => (unit, transaction_id),
            other => panic!("unexpected request body: {other:?}"),
        };
        let ack = Frame {
            start: StartByte::Ack,
            command: Command::Write(0),
            body: Body::WriteAck { unit, transaction_id },
        };
        write_frame(&mut stream, &server_key, &ack).await;
    });

    let bfp = BfpTransport::new(
        IpAddr::from([127, 0, 0, 1]),
        key,
        BfpConfig {
            port,
            timeout: Duration::from_secs(2),
            yield_interval: Duration::from_millis(0),
            scan_timeout: Duration::from_millis(200),
        },
    );
    let comm = Arc::new(Communicator::new(Some(bfp), None, vec![Protocol::Bfp], 5));
    let device = Device::new("1.2.3.4".into(), Some(3), Variant::HPdu, "aa:bb".into());
    assert_eq!(device.uid().as_deref(), Some("1.2.3.4#3"));

    let bundle = Bundle {
        communicator: comm,
        devices: vec![device],
    };
    let mut fields = HashMap::new();
    fields.insert("idaddr".to_string(), Value::Int(7));
    let mut data = HashMap::new();
    data.insert("1.2.3.4#3".to_string(), fields);

    let progress = ProgressNode::root(false);
    let results = bulk::write_all(vec![bundle], Arc::new(data), &progress).await;

    assert!(!results.contains_key("1.2.3.4#3"), "the pre-write uid must not survive a successful address change");
    let status = results.get("1.2.3.4#7").expect("result must be re-keyed to the post-write uid");
    assert_eq!(status.get("idaddr"), Some(&true));
}
