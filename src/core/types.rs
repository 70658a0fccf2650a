//! Protocol and topic identifiers, wire status codes.
//!
//! Identifiers are strings on the wire. The framing layer never rejects an
//! unknown identifier; only the dispatcher decides what it can handle, so
//! both enums carry an `Other` variant that preserves the raw string.

use std::fmt;

/// Protocol identifier of a message, the first half of the routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Connection control (`hello`).
    Control,
    /// Remote target control (`whoami`).
    TargetControl,
    /// Bulk data transfer (`open`/`data`/`close`/`ack`).
    DataSend,
    /// Any protocol this crate does not know about.
    Other(String),
}

impl Protocol {
    /// The wire string for this protocol.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Control => "control",
            Self::TargetControl => "targetControl",
            Self::DataSend => "dataSend",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        match s {
            "control" => Self::Control,
            "targetControl" => Self::TargetControl,
            "dataSend" => Self::DataSend,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic identifier of a message, the second half of the routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Session handshake request (`control`).
    Hello,
    /// Target identity query (`targetControl`).
    Whoami,
    /// Open a data stream (`dataSend`).
    Open,
    /// Stream payload event (`dataSend`).
    Data,
    /// Acknowledge received data (`dataSend`).
    Ack,
    /// Terminate a stream (`dataSend`).
    Close,
    /// Any topic this crate does not know about.
    Other(String),
}

impl Topic {
    /// The wire string for this topic.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Whoami => "whoami",
            Self::Open => "open",
            Self::Data => "data",
            Self::Ack => "ack",
            Self::Close => "close",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        match s {
            "hello" => Self::Hello,
            "whoami" => Self::Whoami,
            "open" => Self::Open,
            "data" => Self::Data,
            "ack" => Self::Ack,
            "close" => Self::Close,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status carried in every response header (u64 on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdsStatus {
    /// Request handled successfully.
    Success,
    /// The peer ran out of memory.
    OutOfMemory,
    /// The request timed out.
    Timeout,
    /// The payload header could not be processed.
    HeaderError,
    /// The payload body could not be processed.
    PayloadError,
    /// No handler is registered for the protocol.
    MissingProtocol,
    /// A protocol-specific error; the body carries the reason.
    ProtocolSpecificError,
}

impl HdsStatus {
    /// Wire value.
    pub fn as_u64(self) -> u64 {
        match self {
            Self::Success => 0,
            Self::OutOfMemory => 1,
            Self::Timeout => 2,
            Self::HeaderError => 3,
            Self::PayloadError => 4,
            Self::MissingProtocol => 5,
            Self::ProtocolSpecificError => 6,
        }
    }

    /// Parse a wire value. Returns `None` for anything undefined.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::OutOfMemory),
            2 => Some(Self::Timeout),
            3 => Some(Self::HeaderError),
            4 => Some(Self::PayloadError),
            5 => Some(Self::MissingProtocol),
            6 => Some(Self::ProtocolSpecificError),
            _ => None,
        }
    }
}

/// Reason code carried in the body of a `ProtocolSpecificError` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolSpecificErrorReason {
    /// Normal termination.
    Normal,
    /// The operation is not allowed in the current mode.
    NotAllowed,
    /// A conflicting operation is already in progress.
    Busy,
    /// The operation was cancelled.
    Cancelled,
    /// The operation is not supported.
    Unsupported,
    /// The request was malformed in a way the protocol cannot name.
    UnexpectedFailure,
    /// The operation timed out.
    Timeout,
    /// The supplied data was invalid.
    BadData,
    /// The peer violated the subprotocol.
    ProtocolError,
    /// No valid configuration is selected.
    InvalidConfiguration,
}

impl ProtocolSpecificErrorReason {
    /// Wire value.
    pub fn as_u64(self) -> u64 {
        match self {
            Self::Normal => 0,
            Self::NotAllowed => 1,
            Self::Busy => 2,
            Self::Cancelled => 3,
            Self::Unsupported => 4,
            Self::UnexpectedFailure => 5,
            Self::Timeout => 6,
            Self::BadData => 7,
            Self::ProtocolError => 8,
            Self::InvalidConfiguration => 9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        for name in ["control", "targetControl", "dataSend"] {
            assert_eq!(Protocol::from(name).as_str(), name);
        }

        // Unknown protocols stay opaque
        let other = Protocol::from("com.example.custom");
        assert_eq!(other, Protocol::Other("com.example.custom".into()));
        assert_eq!(other.as_str(), "com.example.custom");
    }

    #[test]
    fn test_topic_round_trip() {
        for name in ["hello", "whoami", "open", "data", "ack", "close"] {
            assert_eq!(Topic::from(name).as_str(), name);
        }
        assert_eq!(Topic::from("mystery").as_str(), "mystery");
    }

    #[test]
    fn test_status_values() {
        assert_eq!(HdsStatus::Success.as_u64(), 0);
        assert_eq!(HdsStatus::ProtocolSpecificError.as_u64(), 6);
        assert_eq!(HdsStatus::from_u64(2), Some(HdsStatus::Timeout));
        assert_eq!(HdsStatus::from_u64(7), None);
    }

    #[test]
    fn test_reason_values() {
        assert_eq!(ProtocolSpecificErrorReason::NotAllowed.as_u64(), 1);
        assert_eq!(ProtocolSpecificErrorReason::Busy.as_u64(), 2);
        assert_eq!(ProtocolSpecificErrorReason::InvalidConfiguration.as_u64(), 9);
    }
}
