use std::fmt;
use std::time::Duration;

use crate::constants::{DEFAULT_MTU, LOGIN_SECRET_SIZE, PAIR_DEVICE_ID_REGION, PROTOCOL_VERSION};
use crate::error::ConfigError;

/// Identity of one actuator, as provisioned by the vendor cloud.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    mac: String,
    local_key: Vec<u8>,
    pairing_id: Vec<u8>,
    device_id: Vec<u8>,
}

impl Credentials {
    /// `local_key` is the full key; only its first six bytes take part in
    /// key derivation, but all of them are validated here.
    pub fn new(
        mac: impl Into<String>,
        local_key: &str,
        pairing_id: &str,
        device_id: &str,
    ) -> Result<Self, ConfigError> {
        if local_key.len() < LOGIN_SECRET_SIZE {
            return Err(ConfigError::LocalKeyTooShort {
                min: LOGIN_SECRET_SIZE,
                actual: local_key.len(),
            });
        }
        if device_id.len() > PAIR_DEVICE_ID_REGION {
            return Err(ConfigError::DeviceIdTooLong {
                max: PAIR_DEVICE_ID_REGION,
                actual: device_id.len(),
            });
        }
        Ok(Self {
            mac: mac.into(),
            local_key: local_key.as_bytes().to_vec(),
            pairing_id: pairing_id.as_bytes().to_vec(),
            device_id: device_id.as_bytes().to_vec(),
        })
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    /// The first six bytes of the local key.
    pub fn login_secret(&self) -> &[u8] {
        &self.local_key[..LOGIN_SECRET_SIZE]
    }

    pub fn pairing_id(&self) -> &[u8] {
        &self.pairing_id
    }

    pub fn device_id(&self) -> &[u8] {
        &self.device_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mac", &self.mac)
            .field("pairing_id", &String::from_utf8_lossy(&self.pairing_id))
            .field("device_id", &String::from_utf8_lossy(&self.device_id))
            .finish_non_exhaustive()
    }
}

/// Tunables of an [`crate::session::ActuatorSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bytes per GATT write, packet header included.
    pub mtu: usize,
    /// Version nibble announced in packet 0.
    pub protocol_version: u8,
    /// Time the arm stays engaged before the release command is sent.
    pub dwell: Duration,
    /// Upper bound for the device-info + pair exchange.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            protocol_version: PROTOCOL_VERSION,
            dwell: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(20),
        }
    }
}

impl SessionConfig {
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // packet 0 needs room for number, a length varint, version and data
        if self.mtu < 8 {
            return Err(ConfigError::Invalid(format!("mtu {} is below 8 bytes", self.mtu)));
        }
        if self.protocol_version > 0x0F {
            return Err(ConfigError::Invalid(format!(
                "protocol version {} does not fit a nibble",
                self.protocol_version
            )));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid("handshake timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}
