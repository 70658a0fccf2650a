//! Accessory server: listener, prepared sessions, connection actors.

mod connection;
mod server;

pub use connection::{ConnectionHandle, ResponseOutcome};
pub use server::{
    GlobalHandler, HandlerId, HdsServer, HdsServerBuilder, PreparedSessionInfo, ServerConfig,
};
