//! Core constants, identifiers, and error types (always included).

mod constants;
mod error;
mod types;

pub use constants::*;
pub use error::{
    CryptoError, FrameError, HdsError, OpackError, ServerError, SessionError, SetupError, TlvError,
};
pub use types::{HdsStatus, Protocol, ProtocolSpecificErrorReason, Topic};
