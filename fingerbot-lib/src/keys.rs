//! Per-connection symmetric keys, indexed by the security flag byte that
//! prefixes every wire frame.
//!
//! # Key schedule
//!
//! - flag 4: `MD5(login_secret)`, available from the start of a connection
//! - flag 5: `MD5(login_secret || device_nonce)`, available once the device
//!   has answered the device-info request with its 6-byte nonce

use md5::{Digest, Md5};

use crate::constants::{DEVICE_NONCE_SIZE, SECURITY_FLAG_LOGIN, SECURITY_FLAG_SESSION};
use crate::error::SessionError;

pub type Key = [u8; 16];

/// Key used before pairing (security flag 4).
pub fn derive_base_key(login_secret: &[u8]) -> Key {
    Md5::digest(login_secret).into()
}

/// Key used after the device nonce is known (security flag 5).
pub fn derive_session_key(login_secret: &[u8], nonce: &[u8; DEVICE_NONCE_SIZE]) -> Key {
    let mut hasher = Md5::new();
    hasher.update(login_secret);
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Keys of a single connection. Never carried over to the next one.
#[derive(Clone)]
pub struct SessionKeys {
    login_secret: Vec<u8>,
    base: Key,
    session: Option<Key>,
}

impl SessionKeys {
    pub fn new(login_secret: &[u8]) -> Self {
        Self {
            login_secret: login_secret.to_vec(),
            base: derive_base_key(login_secret),
            session: None,
        }
    }

    /// Derive and store the flag-5 key from the nonce the device reported.
    pub fn derive_session(&mut self, nonce: &[u8; DEVICE_NONCE_SIZE]) {
        self.session = Some(derive_session_key(&self.login_secret, nonce));
    }

    pub fn get(&self, security_flag: u8) -> Option<&Key> {
        match security_flag {
            SECURITY_FLAG_LOGIN => Some(&self.base),
            SECURITY_FLAG_SESSION => self.session.as_ref(),
            _ => None,
        }
    }

    /// Like [`SessionKeys::get`], but an absent key is an error.
    pub fn require(&self, security_flag: u8) -> Result<&Key, SessionError> {
        self.get(security_flag)
            .ok_or(SessionError::UnknownSecurityFlag(security_flag))
    }

    pub fn has_session_key(&self) -> bool {
        self.session.is_some()
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("session_derived", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
