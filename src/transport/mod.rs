//! Transport layer: wire frame layout and frame assembly.

mod frame;

pub use frame::{FrameAssembler, SealedFrame, encode_header};
