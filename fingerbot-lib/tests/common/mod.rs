//! Common test utilities: an in-memory transport and a simulated fingerbot

// Not every test file uses every helper
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::time::Instant;

#[allow(unused_imports)]
pub use fingerbot_lib::config::{Credentials, SessionConfig};
#[allow(unused_imports)]
pub use fingerbot_lib::error::{FrameError, SessionError, TransportError};
use fingerbot_lib::crypto::{aes_cbc_encrypt, zero_pad};
use fingerbot_lib::fragment::{Reassembler, Reassembly, split};
pub use fingerbot_lib::frame::{LogicalFrame, ResponseCode, WireFrame, build_wire_frame, open_wire_frame};
pub use fingerbot_lib::keys::{derive_base_key, derive_session_key};
#[allow(unused_imports)]
pub use fingerbot_lib::session::{ActuatorSession, HandshakeState};
use fingerbot_lib::transport::{NotificationSender, Transport};

pub const MAC: &str = "DC:23:4D:00:11:22";
pub const LOCAL_KEY: &str = "a1b2c3d4e5f6a7b8";
pub const PAIRING_ID: &str = "tuya4f0c1a2b3c4d";
pub const DEVICE_ID: &str = "bf1234567890abcdefgh";
pub const NONCE: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

/// Decode hex string to bytes for testing
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Route library logs to the test output. Filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn credentials() -> Credentials {
    Credentials::new(MAC, LOCAL_KEY, PAIRING_ID, DEVICE_ID).expect("valid test credentials")
}

pub fn login_secret() -> &'static [u8] {
    &LOCAL_KEY.as_bytes()[..6]
}

/// A 46-byte device-info payload.
pub fn device_info_payload(protocol: (u8, u8), nonce: [u8; 6]) -> Vec<u8> {
    let mut payload = vec![1, 0, protocol.0, protocol.1, 0x00, 0x00];
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&[1, 0]);
    payload.extend_from_slice(&[0x5A; 32]);
    payload
}

/// Encrypt and fragment a device → host frame.
pub fn device_frame(security_flag: u8, key: &[u8], code: u16, sn: u32, payload: &[u8]) -> Vec<Bytes> {
    let frame = LogicalFrame::new(sn, code, Bytes::copy_from_slice(payload));
    let wire = build_wire_frame(security_flag, key, &frame).expect("encrypt device frame");
    split(&wire.to_bytes(), 20, 2).expect("split device frame")
}

/// Like [`device_frame`], but the trailing CRC is wrong.
pub fn device_frame_bad_crc(security_flag: u8, key: &[u8], code: u16, sn: u32, payload: &[u8]) -> Vec<Bytes> {
    let frame = LogicalFrame::new(sn, code, Bytes::copy_from_slice(payload));
    let mut plaintext = frame.to_bytes().expect("encode device frame").to_vec();
    let last = plaintext.len() - 1;
    plaintext[last] ^= 0xFF;
    zero_pad(&mut plaintext);

    let iv = [0x24u8; 16];
    let wire = WireFrame {
        security_flag,
        iv,
        ciphertext: Bytes::from(aes_cbc_encrypt(key, &iv, &plaintext).expect("encrypt device frame")),
    };
    split(&wire.to_bytes(), 20, 2).expect("split device frame")
}

/// Answers the handshake the way a real fingerbot does.
pub struct FakeDevice {
    pub protocol: (u8, u8),
    pub nonce: [u8; 6],
    pub answer_pair: bool,
    /// Code of an unsolicited report sent before each handshake answer.
    pub chatter: Option<u16>,
    /// Send the pair acknowledgement with a broken CRC.
    pub corrupt_pair_crc: bool,
    pub reassembler: Reassembler,
    pub sn: u32,
    /// Every host frame the device decrypted, in arrival order.
    pub received: Vec<(Instant, LogicalFrame)>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            protocol: (2, 0),
            nonce: NONCE,
            answer_pair: true,
            chatter: None,
            corrupt_pair_crc: false,
            reassembler: Reassembler::new(),
            sn: 0,
            received: Vec::new(),
        }
    }
}

impl FakeDevice {
    fn key(&self, security_flag: u8) -> [u8; 16] {
        match security_flag {
            4 => derive_base_key(login_secret()),
            5 => derive_session_key(login_secret(), &self.nonce),
            other => panic!("host used unknown security flag {}", other),
        }
    }

    fn reply(&mut self, security_flag: u8, code: u16, payload: &[u8]) -> Vec<Bytes> {
        self.sn += 1;
        let mut packets = Vec::new();
        if let Some(chatter) = self.chatter {
            packets.extend(device_frame(4, &self.key(4), chatter, self.sn, &[0x65, 0x01, 0x01, 0x00]));
        }
        packets.extend(device_frame(security_flag, &self.key(security_flag), code, self.sn, payload));
        packets
    }

    /// Handle one packet written by the host, returning notification packets.
    pub fn on_write(&mut self, packet: &[u8]) -> Vec<Bytes> {
        let bytes = match self.reassembler.feed(packet) {
            Ok(Reassembly::Complete(bytes)) => bytes,
            Ok(_) => return Vec::new(),
            Err(err) => panic!("host sent a corrupt packet: {}", err),
        };
        let wire = WireFrame::try_from(bytes).expect("host wire frame");
        let key = self.key(wire.security_flag);
        let frame = open_wire_frame(&wire, &key).expect("host frame decrypts");
        assert_eq!(frame.crc_matches(), Some(true), "host frames always carry a valid CRC");
        self.received.push((Instant::now(), frame.clone()));

        match ResponseCode::from(frame.code) {
            ResponseCode::DeviceInfo => {
                let payload = device_info_payload(self.protocol, self.nonce);
                self.reply(4, u16::from(ResponseCode::DeviceInfo), &payload)
            }
            ResponseCode::Pair if self.answer_pair && self.corrupt_pair_crc => {
                self.sn += 1;
                device_frame_bad_crc(5, &self.key(5), u16::from(ResponseCode::Pair), self.sn, &[0x00])
            }
            ResponseCode::Pair if self.answer_pair => self.reply(5, u16::from(ResponseCode::Pair), &[0x00]),
            _ => Vec::new(),
        }
    }

    pub fn received_codes(&self) -> Vec<u16> {
        self.received.iter().map(|(_, f)| f.code).collect()
    }
}

#[derive(Default)]
struct MockState {
    device: Option<FakeDevice>,
    notifications: Option<NotificationSender>,
    /// Pushed into the notification channel as soon as a connection is made.
    greeting: Vec<Bytes>,
    writes: Vec<Bytes>,
    connects: usize,
    disconnects: usize,
    refuse_connect: bool,
    fail_writes_after: Option<usize>,
}

/// In-memory transport. Clones share state so a test can keep a handle
/// after moving one into the session.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn with_device(device: FakeDevice) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().device = Some(device);
        transport
    }

    pub fn refusing_connect() -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().refuse_connect = true;
        transport
    }

    /// Packets the "device" sends right after connecting, before any request.
    pub fn with_greeting(self, packets: Vec<Bytes>) -> Self {
        self.state.lock().unwrap().greeting = packets;
        self
    }

    pub fn fail_writes_after(&self, count: usize) {
        self.state.lock().unwrap().fail_writes_after = Some(count);
    }

    /// Push a raw notification packet as if the device had sent it.
    pub fn notify(&self, packet: Bytes) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.notifications {
            tx.send(packet).expect("session dropped the notification receiver");
        }
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn with_fake_device<R>(&self, f: impl FnOnce(&FakeDevice) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(state.device.as_ref().expect("no fake device attached"))
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self, address: &str, notifications: NotificationSender) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connect {
            return Err(TransportError::Connect {
                address: address.to_string(),
                reason: "refused by mock".to_string(),
            });
        }
        state.connects += 1;
        for packet in state.greeting.drain(..) {
            let _ = notifications.send(packet);
        }
        state.notifications = Some(notifications);
        Ok(())
    }

    async fn write(&mut self, packet: Bytes) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes_after.is_some_and(|limit| state.writes.len() >= limit) {
            return Err(TransportError::Write("mock write failure".to_string()));
        }
        state.writes.push(packet.clone());

        let replies = match state.device.as_mut() {
            Some(device) => device.on_write(&packet),
            None => Vec::new(),
        };
        if let Some(tx) = &state.notifications {
            for reply in replies {
                let _ = tx.send(reply);
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.notifications = None;
        Ok(())
    }
}
