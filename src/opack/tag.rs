//! Opack tag byte assignments.
//!
//! A tag both names the type and, for the `*_START..*_STOP` ranges, carries
//! an inline length or small-integer value.

pub const INVALID: u8 = 0x00;
pub const TRUE: u8 = 0x01;
pub const FALSE: u8 = 0x02;
pub const TERMINATOR: u8 = 0x03;
pub const NULL: u8 = 0x04;
pub const UUID: u8 = 0x05;
pub const DATE: u8 = 0x06;
pub const INTEGER_MINUS_ONE: u8 = 0x07;
pub const INTEGER_RANGE_START: u8 = 0x08;
pub const INTEGER_RANGE_STOP: u8 = 0x2E;
pub const INT8: u8 = 0x30;
pub const INT16LE: u8 = 0x31;
pub const INT32LE: u8 = 0x32;
pub const INT64LE: u8 = 0x33;
pub const FLOAT32LE: u8 = 0x35;
pub const FLOAT64LE: u8 = 0x36;
pub const UTF8_LENGTH_START: u8 = 0x40;
pub const UTF8_LENGTH_STOP: u8 = 0x60;
pub const UTF8_LENGTH8: u8 = 0x61;
pub const UTF8_LENGTH16LE: u8 = 0x62;
pub const UTF8_LENGTH32LE: u8 = 0x63;
pub const UTF8_LENGTH64LE: u8 = 0x64;
pub const UTF8_NULL_TERMINATED: u8 = 0x6F;
pub const DATA_LENGTH_START: u8 = 0x70;
pub const DATA_LENGTH_STOP: u8 = 0x90;
pub const DATA_LENGTH8: u8 = 0x91;
pub const DATA_LENGTH16LE: u8 = 0x92;
pub const DATA_LENGTH32LE: u8 = 0x93;
pub const DATA_LENGTH64LE: u8 = 0x94;
pub const DATA_TERMINATED: u8 = 0x9F;
pub const COMPRESSION_START: u8 = 0xA0;
pub const COMPRESSION_STOP: u8 = 0xCF;
pub const ARRAY_LENGTH_START: u8 = 0xD0;
pub const ARRAY_LENGTH_STOP: u8 = 0xDE;
pub const ARRAY_TERMINATED: u8 = 0xDF;
pub const DICTIONARY_LENGTH_START: u8 = 0xE0;
pub const DICTIONARY_LENGTH_STOP: u8 = 0xEE;
pub const DICTIONARY_TERMINATED: u8 = 0xEF;

/// Largest integer representable inline in the tag byte.
pub const INTEGER_RANGE_MAX: i64 = (INTEGER_RANGE_STOP - INTEGER_RANGE_START) as i64;

/// Longest string or blob with an inline length.
pub const INLINE_LENGTH_MAX: usize = (UTF8_LENGTH_STOP - UTF8_LENGTH_START) as usize;

/// Longest array encoded with an inline length.
pub const INLINE_ARRAY_MAX: usize = 12;

/// Largest dictionary encoded with an inline pair count.
pub const INLINE_DICTIONARY_MAX: usize = 14;
