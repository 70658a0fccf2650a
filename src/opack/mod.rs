//! Self-describing binary codec for HDS payload headers and bodies.
//!
//! Every value starts with a tag byte that names its type and, for small
//! integers and short strings/blobs/collections, carries the length or value
//! inline. Decoding keeps an append-only table of scalars so back-reference
//! tags can replay repeated values compactly.

pub(crate) mod tag;

mod reader;
mod value;
mod writer;

pub use reader::{Reader, decode};
pub use value::{Dictionary, Value};
pub use writer::{Writer, encode};
