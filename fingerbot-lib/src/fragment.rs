//! Transport-level fragmentation of wire frames.
//!
//! GATT writes and notifications carry at most one MTU of data, so a wire
//! frame travels as a numbered packet sequence:
//!
//! ```text
//! packet 0:  varint(0) | varint(total_len) | version << 4 | data...
//! packet n:  varint(n) | data...
//! ```
//!
//! Varints hold 7 bits per byte, least significant group first, with bit 7
//! set on every byte but the last, and never exceed four bytes.

use std::cmp::Ordering;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::constants::MAX_VARINT_BYTES;
use crate::error::FrameError;

/// Largest value a four byte varint can hold.
pub const MAX_VARINT_VALUE: u32 = (1 << (7 * MAX_VARINT_BYTES)) - 1;

// Untrusted length headers never preallocate more than this.
const MAX_PREALLOC: usize = 4096;

/// Append `value` as a varint.
pub fn encode_varint(value: u32, out: &mut BytesMut) -> Result<(), FrameError> {
    if value > MAX_VARINT_VALUE {
        return Err(FrameError::TooLarge(value as usize));
    }
    let mut rest = value;
    loop {
        let group = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest == 0 {
            out.put_u8(group);
            return Ok(());
        }
        out.put_u8(group | 0x80);
    }
}

/// Decode a varint from the start of `buf`, returning the value and the
/// number of bytes it occupied. `None` if the varint is unterminated within
/// the buffer or within four bytes.
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut value = 0u32;
    for (i, &b) in buf.iter().take(MAX_VARINT_BYTES).enumerate() {
        value |= ((b & 0x7F) as u32) << (7 * i);
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Split the serialized wire frame into packets of at most `mtu` bytes.
///
/// At least one packet is always produced, so an empty frame still
/// announces its (zero) length.
pub fn split(frame: &[u8], mtu: usize, version: u8) -> Result<Vec<Bytes>, FrameError> {
    let total = u32::try_from(frame.len())
        .ok()
        .filter(|len| *len <= MAX_VARINT_VALUE)
        .ok_or(FrameError::TooLarge(frame.len()))?;

    let mut packets = Vec::with_capacity(frame.len() / mtu.max(1) + 1);
    let mut pos = 0;
    let mut number = 0u32;

    loop {
        let mut packet = BytesMut::with_capacity(mtu);
        encode_varint(number, &mut packet)?;
        if number == 0 {
            encode_varint(total, &mut packet)?;
            packet.put_u8(version << 4);
        }

        let header = packet.len();
        if mtu <= header {
            return Err(FrameError::MtuTooSmall { mtu, header });
        }

        let take = (mtu - header).min(frame.len() - pos);
        packet.put_slice(&frame[pos..pos + take]);
        pos += take;
        packets.push(packet.freeze());
        number += 1;

        if pos >= frame.len() {
            break;
        }
    }

    Ok(packets)
}

/// Result of feeding one transport packet to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// The frame in progress is still short of its announced length.
    NeedMore,
    /// A whole wire frame has been collected.
    Complete(Bytes),
    /// Duplicate, out-of-order, or stray packet; nothing changed.
    Discarded,
}

#[derive(Debug)]
struct Partial {
    last_packet: u32,
    expected_len: usize,
    buf: BytesMut,
}

/// Inbound packet reassembly for one connection.
#[derive(Debug, Default)]
pub struct Reassembler {
    in_progress: Option<Partial>,
    version: u8,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protocol version nibble announced by the most recent packet 0.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Bytes collected so far for the frame in progress.
    pub fn buffered(&self) -> Option<&[u8]> {
        self.in_progress.as_ref().map(|p| p.buf.as_ref())
    }

    pub fn reset(&mut self) {
        self.in_progress = None;
    }

    pub fn feed(&mut self, packet: &[u8]) -> Result<Reassembly, FrameError> {
        let Some((number, mut pos)) = decode_varint(packet) else {
            self.reset();
            return Err(FrameError::Malformed(format!(
                "unterminated packet number in {} byte packet",
                packet.len()
            )));
        };

        if number == 0 {
            self.reset();

            let Some((total, used)) = decode_varint(&packet[pos..]) else {
                return Err(FrameError::Malformed("incomplete length header in packet 0".to_string()));
            };
            pos += used;
            let Some(&version_byte) = packet.get(pos) else {
                return Err(FrameError::Malformed("missing version byte in packet 0".to_string()));
            };
            pos += 1;

            self.version = (version_byte >> 4) & 0x0F;
            let expected_len = total as usize;
            let mut buf = BytesMut::with_capacity(expected_len.min(MAX_PREALLOC));
            buf.put_slice(&packet[pos..]);
            trace!(expected_len, version = self.version, "packet 0");

            self.in_progress = Some(Partial {
                last_packet: 0,
                expected_len,
                buf,
            });
        } else {
            let Some(partial) = self.in_progress.as_mut() else {
                trace!(number, "packet without a frame in progress");
                return Ok(Reassembly::Discarded);
            };
            if number <= partial.last_packet {
                trace!(number, last = partial.last_packet, "duplicate or reordered packet");
                return Ok(Reassembly::Discarded);
            }
            partial.buf.put_slice(&packet[pos..]);
            partial.last_packet = number;
        }

        self.check_complete()
    }

    fn check_complete(&mut self) -> Result<Reassembly, FrameError> {
        let Some(partial) = self.in_progress.take() else {
            return Ok(Reassembly::NeedMore);
        };

        match partial.buf.len().cmp(&partial.expected_len) {
            Ordering::Less => {
                self.in_progress = Some(partial);
                Ok(Reassembly::NeedMore)
            }
            Ordering::Equal => Ok(Reassembly::Complete(partial.buf.freeze())),
            Ordering::Greater => Err(FrameError::Overflow {
                expected: partial.expected_len,
                actual: partial.buf.len(),
            }),
        }
    }
}
