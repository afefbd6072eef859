//! AES-128-CBC and CRC16 helpers used by the frame codec.
//!
//! CBC chaining is done by hand on top of the raw block cipher. Neither
//! direction pads: callers zero-pad plaintext to a block multiple before
//! encrypting, and decryption hands back the padding untouched.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::constants::BLOCK_SIZE;
use crate::error::CryptoError;

fn cipher_and_iv(key: &[u8], iv: &[u8], len: usize) -> Result<(Aes128, [u8; BLOCK_SIZE]), CryptoError> {
    let key: &[u8; BLOCK_SIZE] = key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let iv: [u8; BLOCK_SIZE] = iv
        .try_into()
        .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;
    if !len.is_multiple_of(BLOCK_SIZE) {
        return Err(CryptoError::UnalignedInput(len));
    }
    Ok((Aes128::new(key.into()), iv))
}

/// AES-128-CBC encrypt `plaintext`, which must already be block aligned.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (cipher, mut chain) = cipher_and_iv(key, iv, plaintext.len())?;
    let mut output = plaintext.to_vec();

    for block in output.chunks_exact_mut(BLOCK_SIZE) {
        for (byte, prev) in block.iter_mut().zip(chain.iter()) {
            *byte ^= prev;
        }
        cipher.encrypt_block(block.into());
        chain.copy_from_slice(block);
    }

    Ok(output)
}

/// AES-128-CBC decrypt `ciphertext`. Padding is left in the output.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (cipher, mut chain) = cipher_and_iv(key, iv, ciphertext.len())?;
    let mut output = ciphertext.to_vec();

    for block in output.chunks_exact_mut(BLOCK_SIZE) {
        let mut next_chain = [0u8; BLOCK_SIZE];
        next_chain.copy_from_slice(block);
        cipher.decrypt_block(block.into());
        for (byte, prev) in block.iter_mut().zip(chain.iter()) {
            *byte ^= prev;
        }
        chain = next_chain;
    }

    Ok(output)
}

/// CRC-16 with reflected polynomial 0xA001, initial value 0xFFFF and no
/// final XOR (the MODBUS parameterisation).
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if (crc & 1) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Zero-pad `data` in place up to the next block boundary.
pub fn zero_pad(data: &mut Vec<u8>) {
    let rem = data.len() % BLOCK_SIZE;
    if rem != 0 {
        data.resize(data.len() + BLOCK_SIZE - rem, 0);
    }
}
