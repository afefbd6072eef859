// Protocol constants for the fingerbot BLE actuator

/// Default GATT write budget per transport packet
pub const DEFAULT_MTU: usize = 20;

/// Protocol version announced in the high nibble of packet 0
pub const PROTOCOL_VERSION: u8 = 2;

/// AES-128 block, key and IV size
pub const BLOCK_SIZE: usize = 16;

/// Size of the IV carried in every wire frame
pub const IV_SIZE: usize = 16;

/// Security flag byte + IV
pub const WIRE_HEADER_SIZE: usize = 1 + IV_SIZE;

/// snAck(4) + ackSn(4) + code(2) + length(2)
pub const LOGICAL_HEADER_SIZE: usize = 12;

/// Trailing CRC16 appended before padding
pub const CRC_SIZE: usize = 2;

/// Maximum bytes of a transport varint (total length or packet number)
pub const MAX_VARINT_BYTES: usize = 4;

/// Security flag of the key derived from the login secret alone
pub const SECURITY_FLAG_LOGIN: u8 = 4;

/// Security flag of the key derived from login secret and device nonce
pub const SECURITY_FLAG_SESSION: u8 = 5;

/// Number of bytes of the local key used as the login secret
pub const LOGIN_SECRET_SIZE: usize = 6;

/// Size of the nonce ("srand") in a device-info response
pub const DEVICE_NONCE_SIZE: usize = 6;

/// Minimum payload length of a device-info response
pub const DEVICE_INFO_MIN_SIZE: usize = 46;

/// Size of the opaque auth key at the end of a device-info response
pub const AUTH_KEY_SIZE: usize = 32;

/// Lowest `major * 10 + minor` protocol number the handshake supports
pub const MIN_PROTOCOL_NUMBER: u16 = 20;

/// The device id region of a pair request is zero-padded to this size
pub const PAIR_DEVICE_ID_REGION: usize = 22;
