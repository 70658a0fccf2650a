//! Protocol constants for the HomeKit Data Stream wire format.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Frame header size: payload type (1 byte) + 24-bit payload length.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// The only defined frame payload type.
pub const PAYLOAD_TYPE_DATA: u8 = 0x01;

/// Maximum plaintext payload per frame (20-bit length).
pub const MAX_PAYLOAD_SIZE: usize = (1 << 20) - 1;

// =============================================================================
// KEY DERIVATION
// =============================================================================

/// Shared connection secret size.
pub const SHARED_KEY_SIZE: usize = 32;

/// Controller / accessory key salt size.
pub const KEY_SALT_SIZE: usize = 32;

/// Derived session key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// HKDF info for controller-to-accessory traffic (the accessory's read key).
pub const CONTROLLER_TO_ACCESSORY_INFO: &[u8] = b"HDS-Write-Encryption-Key";

/// HKDF info for accessory-to-controller traffic (the accessory's write key).
pub const ACCESSORY_TO_CONTROLLER_INFO: &[u8] = b"HDS-Read-Encryption-Key";

// =============================================================================
// TIMERS
// =============================================================================

/// Deadline for the controller's HELLO after the TCP connection is made.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a prepared session to be bound to a connection.
pub const SESSION_BIND_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a response to an outgoing request.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// DATA SEND
// =============================================================================

/// Maximum chunk carried by a single `dataSend.data` event.
pub const DATA_SEND_CHUNK_SIZE: usize = 0x40000;
