//! AEAD frame sealing with per-direction nonce counters.
//!
//! Each connection holds one [`FrameCrypto`]: a ChaCha20-Poly1305 cipher
//! state per direction, each with a monotonically increasing 64-bit counter.
//! A counter equals the number of frames successfully sealed or opened in
//! its direction - a failed open does not advance it, which is what makes
//! trial decryption during session identification safe. Counters never wrap;
//! exhaustion terminates the connection.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::core::{AEAD_NONCE_SIZE, CryptoError, KEY_SALT_SIZE, SHARED_KEY_SIZE};

use super::keys::{SessionKeys, derive_session_keys};

/// Paired AEAD cipher states for one connection.
pub struct FrameCrypto {
    in_cipher: ChaCha20Poly1305,
    out_cipher: ChaCha20Poly1305,
    in_nonce: u64,
    out_nonce: u64,
}

impl FrameCrypto {
    /// Cipher states for the accessory end of a connection.
    pub fn accessory(
        shared_key: &[u8; SHARED_KEY_SIZE],
        controller_salt: &[u8; KEY_SALT_SIZE],
        accessory_salt: &[u8; KEY_SALT_SIZE],
    ) -> Self {
        Self::from_keys(derive_session_keys(shared_key, controller_salt, accessory_salt))
    }

    /// Cipher states for the controller end: same keys, directions swapped.
    pub fn controller(
        shared_key: &[u8; SHARED_KEY_SIZE],
        controller_salt: &[u8; KEY_SALT_SIZE],
        accessory_salt: &[u8; KEY_SALT_SIZE],
    ) -> Self {
        let keys = derive_session_keys(shared_key, controller_salt, accessory_salt);
        Self {
            in_cipher: ChaCha20Poly1305::new(Key::from_slice(keys.write.as_bytes())),
            out_cipher: ChaCha20Poly1305::new(Key::from_slice(keys.read.as_bytes())),
            in_nonce: 0,
            out_nonce: 0,
        }
    }

    fn from_keys(keys: SessionKeys) -> Self {
        Self {
            in_cipher: ChaCha20Poly1305::new(Key::from_slice(keys.read.as_bytes())),
            out_cipher: ChaCha20Poly1305::new(Key::from_slice(keys.write.as_bytes())),
            in_nonce: 0,
            out_nonce: 0,
        }
    }

    /// Frames successfully opened so far.
    pub fn frames_opened(&self) -> u64 {
        self.in_nonce
    }

    /// Frames sealed so far.
    pub fn frames_sealed(&self) -> u64 {
        self.out_nonce
    }

    /// Seal a plaintext payload, returning `ciphertext || tag`.
    ///
    /// `aad` is the 4-byte frame header. Advances the outbound counter.
    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let next = self
            .out_nonce
            .checked_add(1)
            .ok_or(CryptoError::NonceExhausted)?;

        let nonce = nonce_bytes(self.out_nonce);
        let sealed = self
            .out_cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)?;

        self.out_nonce = next;
        Ok(sealed)
    }

    /// Open `ciphertext || tag` against the inbound counter.
    ///
    /// Advances the counter only when authentication succeeds, so a failed
    /// attempt (as during identification) leaves the state untouched.
    pub fn open(&mut self, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let next = self
            .in_nonce
            .checked_add(1)
            .ok_or(CryptoError::NonceExhausted)?;

        let nonce = nonce_bytes(self.in_nonce);
        let plaintext = self
            .in_cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: sealed, aad })
            .map_err(|_| CryptoError::DecryptionFailed)?;

        self.in_nonce = next;
        Ok(plaintext)
    }
}

/// 96-bit nonce: a zero 32-bit word followed by the little-endian counter.
fn nonce_bytes(counter: u64) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (FrameCrypto, FrameCrypto) {
        let shared = [0x42; 32];
        let controller_salt = [0x01; 32];
        let accessory_salt = [0x02; 32];
        (
            FrameCrypto::accessory(&shared, &controller_salt, &accessory_salt),
            FrameCrypto::controller(&shared, &controller_salt, &accessory_salt),
        )
    }

    #[test]
    fn test_sequential_round_trip() {
        let (mut accessory, mut controller) = pair();
        let aad = [0x01, 0x00, 0x00, 0x05];

        for i in 0..8u8 {
            let plaintext = vec![i; 5];
            let sealed = controller.seal(&aad, &plaintext).unwrap();
            let opened = accessory.open(&aad, &sealed).unwrap();
            assert_eq!(opened, plaintext);

            let reply = accessory.seal(&aad, &plaintext).unwrap();
            assert_eq!(controller.open(&aad, &reply).unwrap(), plaintext);
        }
        assert_eq!(accessory.frames_opened(), 8);
        assert_eq!(accessory.frames_sealed(), 8);
    }

    #[test]
    fn test_tampering_fails() {
        let (mut accessory, mut controller) = pair();
        let aad = [0x01, 0x00, 0x00, 0x04];
        let sealed = controller.seal(&aad, b"data").unwrap();

        // ciphertext byte
        let mut bad = sealed.clone();
        bad[0] ^= 0x01;
        assert!(accessory.open(&aad, &bad).is_err());

        // tag byte
        let mut bad = sealed.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        assert!(accessory.open(&aad, &bad).is_err());

        // associated data
        let bad_aad = [0x01, 0x00, 0x00, 0x05];
        assert!(accessory.open(&bad_aad, &sealed).is_err());

        // untouched frame still opens: failures consumed no nonce
        assert_eq!(accessory.open(&aad, &sealed).unwrap(), b"data");
    }

    #[test]
    fn test_failed_open_does_not_advance_nonce() {
        let (mut accessory, mut controller) = pair();
        let aad = [0x01, 0x00, 0x00, 0x02];

        assert!(accessory.open(&aad, &[0u8; 18]).is_err());
        assert_eq!(accessory.frames_opened(), 0);

        let sealed = controller.seal(&aad, b"ok").unwrap();
        assert_eq!(accessory.open(&aad, &sealed).unwrap(), b"ok");
        assert_eq!(accessory.frames_opened(), 1);
    }

    #[test]
    fn test_wrong_session_cannot_open() {
        let (_, mut controller) = pair();
        let mut other = FrameCrypto::accessory(&[0x43; 32], &[0x01; 32], &[0x02; 32]);

        let aad = [0x01, 0x00, 0x00, 0x03];
        let sealed = controller.seal(&aad, b"abc").unwrap();
        assert!(other.open(&aad, &sealed).is_err());
    }
}
