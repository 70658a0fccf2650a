//! # HDS Protocol
//!
//! **H**omeKit **D**ata **S**tream accessory core: a framed, authenticated,
//! bidirectional message protocol over TCP, running between an accessory
//! (server) and a controller (client) after a shared secret has been
//! negotiated out of band. It provides:
//!
//! - **Framing**: ChaCha20-Poly1305 sealed frames with per-direction
//!   monotonic nonce counters
//! - **Payloads**: a self-describing binary type system with back-reference
//!   compression (opack)
//! - **Multiplexing**: events, requests, and responses routed by
//!   `(protocol, topic)` pairs
//! - **Binding**: sessions prepared out of band and matched to incoming
//!   connections by trial decryption of the first frame
//!
//! ## Feature Flags
//!
//! - `crypto` (default): key derivation and AEAD frame sealing
//! - `server` (default): the tokio accessory server, setup bridge, and
//!   `dataSend` subprotocol
//!
//! ## Modules
//!
//! - [`core`]: constants, identifiers, and error types (always included)
//! - [`opack`]: the payload codec (always included)
//! - [`tlv`]: the TLV8 codec for the setup control plane (always included)
//! - [`session`]: message model and per-connection state (always included)
//! - [`transport`]: wire framing (always included)
//! - [`crypto`]: security layer (requires `crypto` feature)
//! - [`server`], [`setup`], [`datasend`]: the accessory server (requires
//!   `server` feature)
//!
//! ## Example Usage
//!
//! ```ignore
//! use hds_protocol::prelude::*;
//!
//! let server = HdsServer::builder().build();
//! let bridge = SetupBridge::new(server.clone());
//!
//! // From the characteristic-write handler:
//! let response_tlv = bridge.handle_setup_write(&shared_key, &request_tlv).await?;
//! // The controller reads the port and salt from the response and connects.
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Payload codec (always included)
pub mod opack;

// Setup control-plane codec (always included)
pub mod tlv;

// Message model and session state (always included)
pub mod session;

// Wire framing (always included)
pub mod transport;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Accessory server (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

// Setup characteristic bridge (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod setup;

// dataSend subprotocol (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod datasend;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::opack::{Dictionary, Value};
    pub use crate::session::{
        ConnectionState, HandlerRegistry, Message, ProtocolHandler,
    };
    pub use crate::transport::{FrameAssembler, SealedFrame};

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{FrameCrypto, derive_session_keys, generate_salt};

    #[cfg(feature = "server")]
    pub use crate::datasend::{CameraDelegate, RecordingManager, RecordingPacket};
    #[cfg(feature = "server")]
    pub use crate::server::{ConnectionHandle, HdsServer, HdsServerBuilder, ServerConfig};
    #[cfg(feature = "server")]
    pub use crate::setup::SetupBridge;
}

// Re-export commonly used items at crate root
pub use crate::core::{HdsError, HdsStatus, Protocol, Topic};

pub use crate::opack::Value;
pub use crate::session::Message;

#[cfg(feature = "server")]
pub use crate::server::HdsServer;
