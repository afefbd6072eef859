use thiserror::Error;

/// Failures of the AES/CBC helpers. These always indicate a programming
/// error on the caller's side, never bad data from the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid AES key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid IV length: expected 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("Input of {0} bytes is not a multiple of the AES block size")]
    UnalignedInput(usize),
}

/// Corrupt or unrepresentable frames, either while fragmenting/reassembling
/// transport packets or while encoding/decoding a logical frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Reassembly overflow: expected {expected} bytes, accumulated {actual}")]
    Overflow { expected: usize, actual: usize },

    #[error("Payload of {0} bytes does not fit its length field")]
    PayloadTooLong(usize),

    #[error("MTU of {mtu} bytes leaves no room for data after a {header}-byte packet header")]
    MtuTooSmall { mtu: usize, header: usize },

    #[error("Frame of {0} bytes is too large to fragment")]
    TooLarge(usize),
}

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Notification stream closed")]
    Closed,

    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[cfg(feature = "ble")]
    #[error("Characteristic {0} not found on peripheral")]
    CharacteristicNotFound(uuid::Uuid),
}

/// Rejected credentials or session settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Local key must be at least {min} bytes, got {actual}")]
    LocalKeyTooShort { min: usize, actual: usize },

    #[error("Device id must be at most {max} bytes, got {actual}")]
    DeviceIdTooLong { max: usize, actual: usize },

    #[error("Invalid session setting: {0}")]
    Invalid(String),
}

/// The primary error type returned by an [`crate::session::ActuatorSession`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Device speaks protocol {major}.{minor}, at least 2.0 is required")]
    UnsupportedProtocolVersion { major: u8, minor: u8 },

    #[error("No key derived for security flag {0}")]
    UnknownSecurityFlag(u8),

    #[error("Session is not paired")]
    NotPaired,

    #[error("Operation not allowed in state {0}")]
    InvalidState(crate::session::HandshakeState),

    #[error("Handshake did not complete within {0:?}")]
    HandshakeTimeout(std::time::Duration),
}

impl SessionError {
    /// Whether retrying on a fresh connection could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_) | SessionError::Frame(_) | SessionError::HandshakeTimeout(_)
        )
    }
}
