//! Session layer: message model, lifecycle state, handler dispatch.

mod handlers;
mod message;
mod state;

pub use handlers::{
    Dispatch, EventHandler, HandlerRegistry, HandlerResult, ProtocolHandler, RequestHandler,
};
pub use message::{Message, MessageError};
pub use state::ConnectionState;
