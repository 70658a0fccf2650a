//! Decoded message model and payload codec.
//!
//! A frame's plaintext payload is `header_len (1 byte) || header || body`,
//! where header and body are each one opack value (a dictionary in
//! practice). The header names the protocol and carries exactly one of the
//! discriminator keys `event`, `request`, or `response`, which selects the
//! message kind.

use thiserror::Error;

use crate::core::{FrameError, HdsStatus, MAX_PAYLOAD_SIZE, OpackError, Protocol, Topic};
use crate::opack::{self, Value};

/// Errors raised while decoding a payload into a [`Message`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The payload was shorter than its declared header length.
    #[error("payload truncated")]
    Truncated,

    /// The header or body was not valid opack.
    #[error("opack error: {0}")]
    Opack(#[from] OpackError),

    /// The header carried none of `event`, `request`, `response`.
    #[error("header has no discriminator key")]
    MissingDiscriminator,

    /// The header carried no `protocol` string.
    #[error("header has no protocol")]
    MissingProtocol,

    /// A request or response header carried no usable `id`.
    #[error("header has no id")]
    MissingId,

    /// A response header carried no usable `status`.
    #[error("header has no status")]
    MissingStatus,

    /// A response header carried an undefined status value.
    #[error("unknown status {0}")]
    UnknownStatus(u64),
}

/// One decoded HDS message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Fire-and-forget notification.
    Event {
        /// Routing protocol.
        protocol: Protocol,
        /// Routing topic.
        topic: Topic,
        /// Message body.
        body: Value,
    },
    /// A message expecting a correlated response.
    Request {
        /// Routing protocol.
        protocol: Protocol,
        /// Routing topic.
        topic: Topic,
        /// Correlation id, echoed by the response.
        id: u64,
        /// Message body.
        body: Value,
    },
    /// The answer to a request with the same id.
    Response {
        /// Routing protocol.
        protocol: Protocol,
        /// Routing topic.
        topic: Topic,
        /// Correlation id of the answered request.
        id: u64,
        /// Outcome reported by the peer.
        status: HdsStatus,
        /// Message body.
        body: Value,
    },
}

impl Message {
    /// Routing protocol of any message kind.
    pub fn protocol(&self) -> &Protocol {
        match self {
            Self::Event { protocol, .. }
            | Self::Request { protocol, .. }
            | Self::Response { protocol, .. } => protocol,
        }
    }

    /// Routing topic of any message kind.
    pub fn topic(&self) -> &Topic {
        match self {
            Self::Event { topic, .. }
            | Self::Request { topic, .. }
            | Self::Response { topic, .. } => topic,
        }
    }

    /// Decode a plaintext frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let (&header_len, rest) = payload.split_first().ok_or(MessageError::Truncated)?;
        let header_len = usize::from(header_len);
        if rest.len() < header_len {
            return Err(MessageError::Truncated);
        }

        let header = opack::decode(&rest[..header_len])?;
        let body = opack::decode(&rest[header_len..])?;

        let protocol = header
            .get("protocol")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingProtocol)?;
        let protocol = Protocol::from(protocol);

        if let Some(topic) = header.get("event").and_then(Value::as_str) {
            return Ok(Self::Event { protocol, topic: Topic::from(topic), body });
        }
        if let Some(topic) = header.get("request").and_then(Value::as_str) {
            let id = header_id(&header)?;
            return Ok(Self::Request { protocol, topic: Topic::from(topic), id, body });
        }
        if let Some(topic) = header.get("response").and_then(Value::as_str) {
            let id = header_id(&header)?;
            let raw_status = header
                .get("status")
                .and_then(Value::as_i64)
                .ok_or(MessageError::MissingStatus)? as u64;
            let status =
                HdsStatus::from_u64(raw_status).ok_or(MessageError::UnknownStatus(raw_status))?;
            return Ok(Self::Response { protocol, topic: Topic::from(topic), id, status, body });
        }

        Err(MessageError::MissingDiscriminator)
    }

    /// Encode this message into a plaintext frame payload.
    ///
    /// Correlation ids and statuses are forced to 64-bit wire width.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let header = match self {
            Self::Event { protocol, topic, .. } => Value::Dictionary(vec![
                (Value::from("protocol"), Value::from(protocol.as_str())),
                (Value::from("event"), Value::from(topic.as_str())),
            ]),
            Self::Request { protocol, topic, id, .. } => Value::Dictionary(vec![
                (Value::from("protocol"), Value::from(protocol.as_str())),
                (Value::from("request"), Value::from(topic.as_str())),
                (Value::from("id"), Value::Int64(*id as i64)),
            ]),
            Self::Response { protocol, topic, id, status, .. } => Value::Dictionary(vec![
                (Value::from("protocol"), Value::from(protocol.as_str())),
                (Value::from("response"), Value::from(topic.as_str())),
                (Value::from("id"), Value::Int64(*id as i64)),
                (Value::from("status"), Value::Int64(status.as_u64() as i64)),
            ]),
        };
        let body = match self {
            Self::Event { body, .. } | Self::Request { body, .. } | Self::Response { body, .. } => {
                body
            }
        };

        let header_bytes = opack::encode(&header);
        let body_bytes = opack::encode(body);

        let total = 1 + header_bytes.len() + body_bytes.len();
        if header_bytes.len() > u8::MAX as usize || total > MAX_PAYLOAD_SIZE {
            return Err(FrameError::OversizePayload(total));
        }

        let mut payload = Vec::with_capacity(total);
        payload.push(header_bytes.len() as u8);
        payload.extend_from_slice(&header_bytes);
        payload.extend_from_slice(&body_bytes);
        Ok(payload)
    }
}

fn header_id(header: &Value) -> Result<u64, MessageError> {
    header
        .get("id")
        .and_then(Value::as_i64)
        .map(|id| id as u64)
        .ok_or(MessageError::MissingId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_dict() -> Value {
        Value::Dictionary(Vec::new())
    }

    #[test]
    fn test_event_round_trip() {
        let message = Message::Event {
            protocol: Protocol::DataSend,
            topic: Topic::Data,
            body: Value::Dictionary(vec![(Value::from("streamId"), Value::Int(42))]),
        };
        let payload = message.encode().unwrap();
        assert_eq!(Message::decode(&payload).unwrap(), message);
    }

    #[test]
    fn test_request_round_trip_forces_int64_id() {
        let message = Message::Request {
            protocol: Protocol::Control,
            topic: Topic::Hello,
            id: 1,
            body: empty_dict(),
        };
        let payload = message.encode().unwrap();

        // header: {protocol, request, id} with the id as a full INT64
        let header_len = usize::from(payload[0]);
        let header = &payload[1..1 + header_len];
        let int64_pos = header
            .windows(9)
            .position(|w| w == &[0x33, 1, 0, 0, 0, 0, 0, 0, 0][..]);
        assert!(int64_pos.is_some(), "id must be wire-width INT64");

        assert_eq!(Message::decode(&payload).unwrap(), message);
    }

    #[test]
    fn test_response_round_trip() {
        let message = Message::Response {
            protocol: Protocol::DataSend,
            topic: Topic::Open,
            id: 7,
            status: HdsStatus::ProtocolSpecificError,
            body: Value::Dictionary(vec![(Value::from("status"), Value::Int(2))]),
        };
        let payload = message.encode().unwrap();
        assert_eq!(Message::decode(&payload).unwrap(), message);
    }

    #[test]
    fn test_unknown_protocol_and_topic_pass_through() {
        let message = Message::Event {
            protocol: Protocol::Other("com.example.custom".into()),
            topic: Topic::Other("poke".into()),
            body: empty_dict(),
        };
        let payload = message.encode().unwrap();
        let decoded = Message::decode(&payload).unwrap();
        assert_eq!(decoded.protocol().as_str(), "com.example.custom");
        assert_eq!(decoded.topic().as_str(), "poke");
    }

    #[test]
    fn test_accepts_any_64_bit_id() {
        let message = Message::Request {
            protocol: Protocol::Control,
            topic: Topic::Hello,
            id: u64::MAX,
            body: empty_dict(),
        };
        let payload = message.encode().unwrap();
        match Message::decode(&payload).unwrap() {
            Message::Request { id, .. } => assert_eq!(id, u64::MAX),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_reject_malformed_headers() {
        // no discriminator
        let header = opack::encode(&Value::Dictionary(vec![(
            Value::from("protocol"),
            Value::from("control"),
        )]));
        let body = opack::encode(&empty_dict());
        let mut payload = vec![header.len() as u8];
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&body);
        assert_eq!(
            Message::decode(&payload),
            Err(MessageError::MissingDiscriminator)
        );

        // truncated header
        assert_eq!(Message::decode(&[5, 0x41]), Err(MessageError::Truncated));
        assert_eq!(Message::decode(&[]), Err(MessageError::Truncated));
    }
}
