use std::fmt;

use bytes::{Buf, Bytes};
use tracing::warn;

use crate::constants::{AUTH_KEY_SIZE, DEVICE_INFO_MIN_SIZE, DEVICE_NONCE_SIZE, MIN_PROTOCOL_NUMBER};
use crate::error::{FrameError, SessionError};
use crate::frame::{LogicalFrame, ResponseCode};

/// A `major.minor` version pair as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    /// The `major * 10 + minor` number the device firmware compares against.
    pub fn number(&self) -> u16 {
        self.major as u16 * 10 + self.minor as u16
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Answer to the DEVICE_INFO request.
///
/// Layout (46 bytes, trailing bytes ignored):
/// - 0-1: device firmware version
/// - 2-3: protocol version
/// - 4: flag
/// - 5: is_bind
/// - 6-11: nonce ("srand") for the session key
/// - 12-13: hardware version
/// - 14-45: auth key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_version: Version,
    pub protocol_version: Version,
    pub flag: u8,
    pub is_bind: bool,
    pub nonce: [u8; DEVICE_NONCE_SIZE],
    pub hardware_version: Version,
    pub auth_key: [u8; AUTH_KEY_SIZE],
}

impl DeviceInfo {
    pub fn parse(payload: &[u8]) -> Result<Self, SessionError> {
        if payload.len() < DEVICE_INFO_MIN_SIZE {
            return Err(FrameError::Truncated {
                expected: DEVICE_INFO_MIN_SIZE,
                actual: payload.len(),
            }
            .into());
        }

        let mut buf = payload;
        let device_version = Version {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let protocol_version = Version {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let flag = buf.get_u8();
        let is_bind = buf.get_u8() != 0;
        let mut nonce = [0u8; DEVICE_NONCE_SIZE];
        buf.copy_to_slice(&mut nonce);
        let hardware_version = Version {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let mut auth_key = [0u8; AUTH_KEY_SIZE];
        buf.copy_to_slice(&mut auth_key);

        if protocol_version.number() < MIN_PROTOCOL_NUMBER {
            warn!(%protocol_version, %device_version, "device protocol too old for this handshake");
            return Err(SessionError::UnsupportedProtocolVersion {
                major: protocol_version.major,
                minor: protocol_version.minor,
            });
        }

        Ok(Self {
            device_version,
            protocol_version,
            flag,
            is_bind,
            nonce,
            hardware_version,
            auth_key,
        })
    }

    pub fn auth_key_hex(&self) -> String {
        hex::encode(self.auth_key)
    }
}

/// A decrypted frame interpreted by its function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    DeviceInfo(DeviceInfo),
    /// The payload carries nothing of interest; its arrival means paired.
    PairAck,
    /// Any other code. Newer firmware sends codes we don't know about, so
    /// this is never treated as an error.
    Unrecognized { code: u16, payload: Bytes },
}

impl Response {
    pub fn parse(frame: &LogicalFrame) -> Result<Self, SessionError> {
        match frame.response_code() {
            ResponseCode::DeviceInfo => Ok(Response::DeviceInfo(DeviceInfo::parse(&frame.payload)?)),
            ResponseCode::Pair => Ok(Response::PairAck),
            _ => Ok(Response::Unrecognized {
                code: frame.code,
                payload: frame.payload.clone(),
            }),
        }
    }
}
