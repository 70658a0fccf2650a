//! Session key derivation.
//!
//! Both directions of a connection are keyed from one 32-byte shared secret
//! negotiated out of band, salted with the concatenation of the controller's
//! and the accessory's key salts. The direction is selected by the HKDF info
//! string: the accessory's read key carries the write-side info (it decrypts
//! what the controller writes) and vice versa.

use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::core::{
    ACCESSORY_TO_CONTROLLER_INFO, CONTROLLER_TO_ACCESSORY_INFO, KEY_SALT_SIZE, SESSION_KEY_SIZE,
    SHARED_KEY_SIZE,
};

/// A derived symmetric session key, zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Wrap existing key material.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// The derived key pair for one connection, from the accessory's viewpoint.
pub struct SessionKeys {
    /// Decrypts controller-to-accessory frames.
    pub read: SessionKey,
    /// Encrypts accessory-to-controller frames.
    pub write: SessionKey,
}

/// Generate a fresh random key salt.
pub fn generate_salt() -> [u8; KEY_SALT_SIZE] {
    let mut salt = [0u8; KEY_SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the accessory's read/write keys for one connection.
///
/// HKDF-SHA512 with `salt = controller_salt || accessory_salt` and the
/// per-direction info strings.
pub fn derive_session_keys(
    shared_key: &[u8; SHARED_KEY_SIZE],
    controller_salt: &[u8; KEY_SALT_SIZE],
    accessory_salt: &[u8; KEY_SALT_SIZE],
) -> SessionKeys {
    let mut salt = [0u8; KEY_SALT_SIZE * 2];
    salt[..KEY_SALT_SIZE].copy_from_slice(controller_salt);
    salt[KEY_SALT_SIZE..].copy_from_slice(accessory_salt);

    let keys = SessionKeys {
        read: expand(shared_key, &salt, CONTROLLER_TO_ACCESSORY_INFO),
        write: expand(shared_key, &salt, ACCESSORY_TO_CONTROLLER_INFO),
    };
    salt.zeroize();
    keys
}

fn expand(shared_key: &[u8; SHARED_KEY_SIZE], salt: &[u8], info: &[u8]) -> SessionKey {
    let hk = Hkdf::<Sha512>::new(Some(salt), shared_key);
    let mut okm = [0u8; SESSION_KEY_SIZE];
    // A 32-byte output is always valid for HKDF-SHA512.
    hk.expand(info, &mut okm)
        .unwrap_or_else(|_| unreachable!("32-byte okm is within hkdf-sha512 bounds"));
    SessionKey::from_bytes(okm)
}
