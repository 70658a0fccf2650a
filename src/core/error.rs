//! Error types for the HDS protocol, one enum per layer.

use thiserror::Error;

use super::types::Protocol;

/// Errors raised while decoding an opack value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpackError {
    /// Ran out of bytes before the value was fully read.
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the current item.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// The reserved invalid tag (0x00) or an unassigned tag byte.
    #[error("invalid opack tag {0:#04x}")]
    InvalidTag(u8),

    /// A string item did not hold valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// A back-reference pointed past the end of the scalar table.
    #[error("back-reference index {0} out of range")]
    BackReferenceOutOfRange(usize),

    /// A terminated dictionary held an odd number of items.
    #[error("terminated dictionary has a key without a value")]
    OddDictionary,

    /// A terminator appeared outside a terminated collection.
    #[error("unexpected terminator")]
    UnexpectedTerminator,

    /// Bytes were left over after the top-level value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Errors raised by the TLV8 codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    /// An item's declared length ran past the end of the buffer.
    #[error("tlv item truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes declared by the item header.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A required item was absent.
    #[error("missing tlv item {0:#04x}")]
    MissingItem(u8),

    /// An item had an unexpected length or value.
    #[error("invalid tlv item {0:#04x}")]
    InvalidItem(u8),
}

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted frame).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Nonce counter exhausted - the connection must terminate.
    #[error("nonce counter exhausted - connection must terminate")]
    NonceExhausted,
}

/// Errors at the wire framing layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A frame header declared a payload larger than the 20-bit limit.
    #[error("declared payload length {0} exceeds maximum")]
    OversizeDeclared(usize),

    /// A plaintext payload was too large to frame.
    #[error("payload length {0} exceeds maximum")]
    OversizePayload(usize),
}

/// Errors in the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A handler bundle is already registered for the protocol.
    #[error("protocol {0} already has a registered handler")]
    AlreadyRegistered(Protocol),

    /// The message could not be encoded into a frame payload.
    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),

    /// The peer did not answer a request in time.
    #[error("request timed out")]
    RequestTimeout,

    /// The connection closed before the request was answered.
    #[error("request cancelled: connection closed")]
    Cancelled,

    /// The connection is closed; nothing can be sent.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Errors in the accessory server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// The server has shut down.
    #[error("server shut down")]
    Shutdown,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the setup characteristic bridge.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The setup request carried an unsupported command, transport, or salt.
    #[error("invalid value in setup request")]
    InvalidRequest,

    /// The setup request TLV was malformed.
    #[error("setup tlv error: {0}")]
    Tlv(#[from] TlvError),

    /// The server could not prepare a session.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

/// Top-level HDS errors.
#[derive(Debug, Error)]
pub enum HdsError {
    /// Opack codec error.
    #[error("opack error: {0}")]
    Opack(#[from] OpackError),

    /// Frame layer error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Server error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
