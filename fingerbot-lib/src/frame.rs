use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::constants::{CRC_SIZE, IV_SIZE, LOGICAL_HEADER_SIZE, WIRE_HEADER_SIZE};
use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt, crc16, zero_pad};
use crate::error::{FrameError, SessionError};

/// Function codes carried in the logical frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum ResponseCode {
    DeviceInfo = 0,
    Pair = 1,
    SendDps = 2,
    DeviceStatus = 3,
    // device-initiated
    ReceiveDp = 0x8001,
    ReceiveTimeRequest = 0x8011,

    #[num_enum(catch_all)]
    Unknown(u16),
}

/// A frame before encryption / after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFrame {
    pub sn_ack: u32,
    pub ack_sn: u32,
    pub code: u16,
    pub payload: Bytes,
    /// CRC16 found after the payload on decode, if the tail had room for it.
    pub trailing_crc: Option<u16>,
}

impl LogicalFrame {
    pub fn new(sn_ack: u32, code: impl Into<u16>, payload: impl Into<Bytes>) -> Self {
        Self {
            sn_ack,
            ack_sn: 0,
            code: code.into(),
            payload: payload.into(),
            trailing_crc: None,
        }
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from_primitive(self.code)
    }

    /// Header and payload as they are fed to the CRC.
    fn header_and_payload(&self) -> Result<BytesMut, FrameError> {
        let len = u16::try_from(self.payload.len())
            .map_err(|_| FrameError::PayloadTooLong(self.payload.len()))?;

        let mut buf = BytesMut::with_capacity(LOGICAL_HEADER_SIZE + self.payload.len() + CRC_SIZE);
        buf.put_u32(self.sn_ack);
        buf.put_u32(self.ack_sn);
        buf.put_u16(self.code);
        buf.put_u16(len);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Serialize as `header || payload || crc16`, not yet padded.
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = self.header_and_payload()?;
        let crc = crc16(&buf);
        buf.put_u16(crc);
        Ok(buf.freeze())
    }

    /// Parse a decrypted buffer. CRC and zero padding after the payload are
    /// not required to be present or valid.
    pub fn from_decrypted(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < LOGICAL_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: LOGICAL_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let sn_ack = bytes.get_u32();
        let ack_sn = bytes.get_u32();
        let code = bytes.get_u16();
        let len = bytes.get_u16() as usize;

        if bytes.len() < len {
            return Err(FrameError::Truncated {
                expected: LOGICAL_HEADER_SIZE + len,
                actual: LOGICAL_HEADER_SIZE + bytes.len(),
            });
        }
        let payload = bytes.split_to(len);
        let trailing_crc = (bytes.len() >= CRC_SIZE).then(|| bytes.get_u16());

        Ok(Self {
            sn_ack,
            ack_sn,
            code,
            payload,
            trailing_crc,
        })
    }

    /// Advisory integrity check. Devices are not known to always send a
    /// CRC, so `None` means "nothing to compare against".
    pub fn crc_matches(&self) -> Option<bool> {
        let expected = self.trailing_crc?;
        let buf = self.header_and_payload().ok()?;
        Some(crc16(&buf) == expected)
    }
}

/// An encrypted frame as exchanged over the transport, before fragmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub security_flag: u8,
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Bytes,
}

impl WireFrame {
    /// Size of `flag || iv || ciphertext` on the wire.
    pub fn encoded_len(&self) -> usize {
        WIRE_HEADER_SIZE + self.ciphertext.len()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.security_flag);
        buf.put_slice(&self.iv);
        buf.put_slice(&self.ciphertext);
        buf.freeze()
    }
}

impl TryFrom<Bytes> for WireFrame {
    type Error = FrameError;

    fn try_from(mut bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() < WIRE_HEADER_SIZE {
            return Err(FrameError::Malformed(format!(
                "wire frame of {} bytes is shorter than its {}-byte header",
                bytes.len(),
                WIRE_HEADER_SIZE
            )));
        }
        let security_flag = bytes.get_u8();
        let mut iv = [0u8; IV_SIZE];
        bytes.copy_to_slice(&mut iv);
        Ok(Self {
            security_flag,
            iv,
            ciphertext: bytes,
        })
    }
}

impl From<WireFrame> for Bytes {
    fn from(frame: WireFrame) -> Self {
        frame.to_bytes()
    }
}

/// Encrypt a logical frame under `key` with a fresh random IV.
pub fn build_wire_frame(security_flag: u8, key: &[u8], frame: &LogicalFrame) -> Result<WireFrame, SessionError> {
    let iv: [u8; IV_SIZE] = rand::random();
    build_wire_frame_with_iv(security_flag, key, iv, frame)
}

/// Same as [`build_wire_frame`] with a caller-chosen IV.
pub fn build_wire_frame_with_iv(
    security_flag: u8,
    key: &[u8],
    iv: [u8; IV_SIZE],
    frame: &LogicalFrame,
) -> Result<WireFrame, SessionError> {
    let mut plaintext = frame.to_bytes()?.to_vec();
    zero_pad(&mut plaintext);
    let ciphertext = aes_cbc_encrypt(key, &iv, &plaintext)?;

    Ok(WireFrame {
        security_flag,
        iv,
        ciphertext: Bytes::from(ciphertext),
    })
}

/// Decrypt a wire frame and split the logical fields back out.
pub fn open_wire_frame(frame: &WireFrame, key: &[u8]) -> Result<LogicalFrame, SessionError> {
    if !frame.ciphertext.len().is_multiple_of(IV_SIZE) {
        return Err(FrameError::Malformed(format!(
            "ciphertext of {} bytes is not block aligned",
            frame.ciphertext.len()
        ))
        .into());
    }
    let plaintext = aes_cbc_decrypt(key, &frame.iv, &frame.ciphertext)?;
    Ok(LogicalFrame::from_decrypted(Bytes::from(plaintext))?)
}
