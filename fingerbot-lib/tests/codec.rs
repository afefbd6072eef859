mod common;

use bytes::Bytes;
use common::*;
use fingerbot_lib::fragment::{Reassembler, Reassembly, split};

const MTUS: [usize; 4] = [16, 20, 64, 247];
const SIZES: [usize; 14] = [0, 1, 2, 13, 16, 17, 33, 127, 128, 129, 1000, 2048, 4096, 10 * 1024];

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

fn reassemble(packets: &[Bytes]) -> Option<Bytes> {
    let mut reassembler = Reassembler::new();
    let mut complete = None;
    for packet in packets {
        if let Reassembly::Complete(frame) = reassembler.feed(packet).expect("well-formed packet") {
            assert!(complete.is_none(), "frame completed twice");
            complete = Some(frame);
        }
    }
    complete
}

#[test]
fn test_split_reassemble_across_sizes_and_mtus() {
    for mtu in MTUS {
        for size in SIZES {
            let frame = pattern(size);
            let packets = split(&frame, mtu, 2).unwrap();

            assert!(!packets.is_empty());
            assert!(
                packets.iter().all(|p| p.len() <= mtu),
                "packet over MTU {} for {} byte frame",
                mtu,
                size
            );
            let rebuilt = reassemble(&packets).unwrap_or_else(|| panic!("no frame for size {} mtu {}", size, mtu));
            assert_eq!(rebuilt.as_ref(), frame.as_slice(), "size {} mtu {}", size, mtu);
        }
    }
}

#[test]
fn test_duplicated_packets_do_not_change_result() {
    for mtu in MTUS {
        let frame = pattern(3000);
        let packets = split(&frame, mtu, 2).unwrap();

        let mut doubled = Vec::new();
        for packet in &packets {
            doubled.push(packet.clone());
            // Packet 0 restarts the frame, so only repeat the rest
            if packet[0] != 0 {
                doubled.push(packet.clone());
            }
        }
        assert_eq!(reassemble(&doubled).as_deref(), Some(frame.as_slice()), "mtu {}", mtu);
    }
}

#[test]
fn test_reassembler_reports_version_nibble() {
    let packets = split(&pattern(40), 20, 2).unwrap();
    let mut reassembler = Reassembler::new();
    for packet in &packets {
        reassembler.feed(packet).unwrap();
    }
    assert_eq!(reassembler.version(), 2);
}

#[test]
fn test_wire_frame_survives_fragmentation() {
    let key = derive_base_key(login_secret());
    for mtu in MTUS {
        for size in [0usize, 5, 46, 300] {
            let payload = pattern(size);
            let frame = LogicalFrame::new(7, ResponseCode::ReceiveDp, Bytes::from(payload.clone()));
            let wire = build_wire_frame(4, &key, &frame).unwrap();

            let rebuilt = reassemble(&split(&wire.to_bytes(), mtu, 2).unwrap()).expect("complete frame");
            let wire = WireFrame::try_from(rebuilt).unwrap();
            assert_eq!(wire.security_flag, 4);

            let opened = open_wire_frame(&wire, &key).unwrap();
            assert_eq!(opened.sn_ack, 7);
            assert_eq!(opened.code, 0x8001);
            assert_eq!(opened.payload.as_ref(), payload.as_slice());
            assert_eq!(opened.crc_matches(), Some(true));
        }
    }
}

#[test]
fn test_each_frame_uses_a_fresh_iv() {
    let key = derive_base_key(login_secret());
    let frame = LogicalFrame::new(1, ResponseCode::DeviceInfo, Bytes::new());
    let a = build_wire_frame(4, &key, &frame).unwrap();
    let b = build_wire_frame(4, &key, &frame).unwrap();
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn test_wrong_key_does_not_yield_valid_crc() {
    let login = derive_base_key(login_secret());
    let session = derive_session_key(login_secret(), &NONCE);
    let frame = LogicalFrame::new(1, ResponseCode::Pair, Bytes::from_static(b"hello fingerbot"));
    let wire = build_wire_frame(5, &session, &frame).unwrap();

    // Decryption under the wrong key either fails to parse or fails the CRC
    if let Ok(opened) = open_wire_frame(&wire, &login) {
        assert_ne!(opened.crc_matches(), Some(true));
    }
}

#[test]
fn test_key_derivation_is_deterministic() {
    assert_eq!(derive_base_key(login_secret()), derive_base_key(b"a1b2c3"));
    assert_eq!(
        derive_session_key(login_secret(), &NONCE),
        derive_session_key(b"a1b2c3", &[1, 2, 3, 4, 5, 6])
    );
    assert_ne!(derive_base_key(login_secret()), derive_session_key(login_secret(), &NONCE));
    assert_ne!(
        derive_session_key(login_secret(), &NONCE),
        derive_session_key(login_secret(), &[6, 5, 4, 3, 2, 1])
    );
}
