pub mod config;
pub mod constants;
pub mod crypto;
pub mod dp;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod keys;
pub mod message;
pub mod session;
pub mod transport;

#[cfg(feature = "ble")]
pub mod ble;

// Re-export the main types for easy access
pub use config::{Credentials, SessionConfig};
pub use error::SessionError;
pub use session::{ActuatorSession, HandshakeState};
pub use transport::Transport;

#[cfg(feature = "ble")]
pub use ble::BleTransport;
