//! Security layer: HKDF key derivation and AEAD frame sealing.

mod cipher;
mod keys;

pub use cipher::FrameCrypto;
pub use keys::{SessionKey, SessionKeys, derive_session_keys, generate_salt};
