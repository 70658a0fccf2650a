//! Shared helpers: a minimal in-process controller speaking the wire
//! protocol over a real TCP socket.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use hds_protocol::core::{HdsStatus, Protocol, Topic};
use hds_protocol::crypto::FrameCrypto;
use hds_protocol::opack::Value;
use hds_protocol::server::HdsServer;
use hds_protocol::session::Message;
use hds_protocol::setup::SetupBridge;
use hds_protocol::tlv;
use hds_protocol::transport::{FrameAssembler, encode_header};

pub const SHARED_KEY: [u8; 32] = [0x42; 32];
pub const CONTROLLER_SALT: [u8; 32] = [0x24; 32];

/// Build a body dictionary from string keys.
pub fn dict(pairs: Vec<(&str, Value)>) -> Value {
    Value::Dictionary(
        pairs
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

/// Run the setup characteristic write and return `(port, accessory_salt)`.
pub async fn setup_session(bridge: &SetupBridge) -> (u16, [u8; 32]) {
    let request = tlv::encode(&[
        (0x01, &[0x00][..]),
        (0x02, &[0x00][..]),
        (0x03, &CONTROLLER_SALT),
    ]);
    let response = bridge
        .handle_setup_write(&SHARED_KEY, &request)
        .await
        .expect("setup write should succeed");

    let items = tlv::decode(&response).unwrap();
    assert_eq!(tlv::find(&items, 0x01), Some(&[0x00][..]), "setup status");

    let parameters = tlv::decode(tlv::find(&items, 0x02).unwrap()).unwrap();
    let port_bytes: [u8; 2] = tlv::find(&parameters, 0x01).unwrap().try_into().unwrap();
    let port = u16::from_le_bytes(port_bytes);

    let accessory_salt: [u8; 32] = tlv::find(&items, 0x03).unwrap().try_into().unwrap();
    (port, accessory_salt)
}

/// The controller end of a data stream connection.
pub struct Controller {
    stream: TcpStream,
    crypto: FrameCrypto,
    assembler: FrameAssembler,
}

impl Controller {
    /// Open a TCP connection using the key material from setup.
    pub async fn connect(port: u16, accessory_salt: &[u8; 32]) -> Self {
        Self::connect_with_key(port, &SHARED_KEY, accessory_salt).await
    }

    /// Open a TCP connection with an explicit shared key (to test
    /// identification failure).
    pub async fn connect_with_key(port: u16, shared_key: &[u8; 32], accessory_salt: &[u8; 32]) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Self {
            stream,
            crypto: FrameCrypto::controller(shared_key, &CONTROLLER_SALT, accessory_salt),
            assembler: FrameAssembler::new(),
        }
    }

    /// Seal and send one message.
    pub async fn send(&mut self, message: &Message) {
        let payload = message.encode().unwrap();
        let header = encode_header(payload.len()).unwrap();
        let sealed = self.crypto.seal(&header, &payload).unwrap();

        let mut wire = header.to_vec();
        wire.extend_from_slice(&sealed);
        self.stream.write_all(&wire).await.unwrap();
    }

    /// Receive the next message; `None` when the accessory hangs up.
    pub async fn recv(&mut self) -> Option<Message> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.assembler.next_frame().unwrap() {
                let plaintext = self.crypto.open(&frame.header, &frame.sealed).unwrap();
                return Some(Message::decode(&plaintext).unwrap());
            }
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for accessory")
                .unwrap();
            if n == 0 {
                return None;
            }
            self.assembler.extend(&buf[..n]);
        }
    }

    /// Complete the HELLO handshake with request id 1.
    pub async fn hello(&mut self) {
        self.send(&Message::Request {
            protocol: Protocol::Control,
            topic: Topic::Hello,
            id: 1,
            body: dict(vec![]),
        })
        .await;

        match self.recv().await.expect("hello response") {
            Message::Response { protocol, topic, id, status, body } => {
                assert_eq!(protocol, Protocol::Control);
                assert_eq!(topic, Topic::Hello);
                assert_eq!(id, 1);
                assert_eq!(status, HdsStatus::Success);
                assert!(body.is_empty_dictionary());
            }
            other => panic!("expected hello response, got {other:?}"),
        }
    }

    /// Wait for the accessory to close the connection.
    pub async fn expect_close(&mut self) {
        let mut buf = [0u8; 1024];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for close")
                .unwrap_or(0);
            if n == 0 {
                return;
            }
        }
    }
}

/// A server plus a bound controller that completed the handshake.
pub async fn ready_pair(server: HdsServer) -> (SetupBridge, Controller) {
    let bridge = SetupBridge::new(server);
    let (port, accessory_salt) = setup_session(&bridge).await;
    let mut controller = Controller::connect(port, &accessory_salt).await;
    controller.hello().await;
    (bridge, controller)
}
