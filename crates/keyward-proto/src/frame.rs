//! Broker frames.
//!
//! A frame on the wire is `[FrameHeader: 12 bytes] + [CBOR body]`. The body
//! is a [`BrokerFrame`], which carries its own variant tag; the header only
//! delimits it.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    FrameHeader, MAX_PAYLOAD_SIZE,
    errors::{ProtocolError, Result},
};

/// Broker's answer to a subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Request applied
    Accepted,
    /// Request refused
    Rejected {
        /// Human-readable reason
        reason: String,
    },
}

/// Every message exchanged between a client and the broker.
///
/// # Invariants
///
/// - Each request carrying a `request_id` is answered by exactly one ack
///   with the same id
/// - `Publish` is never acknowledged
/// - `payload` never exceeds [`MAX_PAYLOAD_SIZE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerFrame {
    /// Client opens a session
    Connect {
        /// Self-chosen client name, used only for logging
        client_id: String,
    },
    /// Broker accepts the session
    ConnAck,
    /// Client subscribes to a topic
    Subscribe {
        /// Correlates the ack
        request_id: u32,
        /// Topic to subscribe to
        topic: String,
    },
    /// Broker answers a `Subscribe`
    SubAck {
        /// Id of the request being answered
        request_id: u32,
        /// Result
        outcome: Outcome,
    },
    /// Client drops a subscription
    Unsubscribe {
        /// Correlates the ack
        request_id: u32,
        /// Topic to unsubscribe from
        topic: String,
    },
    /// Broker answers an `Unsubscribe`
    UnsubAck {
        /// Id of the request being answered
        request_id: u32,
        /// Result
        outcome: Outcome,
    },
    /// Client publishes to a topic
    Publish {
        /// Destination topic
        topic: String,
        /// Opaque application bytes
        payload: Bytes,
    },
    /// Broker delivers a published message to a subscriber
    Message {
        /// Topic it was published on
        topic: String,
        /// Opaque application bytes
        payload: Bytes,
    },
}

impl BrokerFrame {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::ConnAck => "connack",
            Self::Subscribe { .. } => "subscribe",
            Self::SubAck { .. } => "suback",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::UnsubAck { .. } => "unsuback",
            Self::Publish { .. } => "publish",
            Self::Message { .. } => "message",
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Publish { payload, .. } | Self::Message { payload, .. } => payload.len(),
            _ => 0,
        }
    }

    /// Encode header and body into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the application payload exceeds
    ///   [`MAX_PAYLOAD_SIZE`] or the body exceeds
    ///   [`FrameHeader::MAX_BODY_SIZE`]
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let payload_len = self.payload_len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: payload_len, max: MAX_PAYLOAD_SIZE });
        }

        let mut body = BytesMut::new().writer();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        let body = body.into_inner();

        let body_len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= FrameHeader::MAX_BODY_SIZE)
            .ok_or(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: FrameHeader::MAX_BODY_SIZE as usize,
            })?;

        dst.put_slice(&FrameHeader::new(body_len).to_bytes());
        dst.put_slice(&body);

        Ok(())
    }

    /// Encode into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Same as [`encode`](Self::encode).
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one frame from the front of `bytes`. Trailing bytes are
    /// ignored.
    ///
    /// # Errors
    ///
    /// - Header validation errors from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if the body is incomplete
    /// - `ProtocolError::CborDecode` if the body is not a valid frame
    /// - `ProtocolError::PayloadTooLarge` if the decoded payload exceeds
    ///   [`MAX_PAYLOAD_SIZE`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let body_len = header.payload_size() as usize;

        let body = bytes.get(FrameHeader::SIZE..FrameHeader::SIZE + body_len).ok_or(
            ProtocolError::FrameTruncated {
                expected: body_len,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            },
        )?;

        Self::decode_body(body)
    }

    /// Decode a CBOR body whose header has already been validated.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self> {
        let frame: Self =
            ciborium::from_reader(body).map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        let payload_len = frame.payload_len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: payload_len, max: MAX_PAYLOAD_SIZE });
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_roundtrip() {
        let frame = BrokerFrame::Publish {
            topic: "rooms/general".to_string(),
            payload: Bytes::from_static(b"hello"),
        };

        let wire = frame.to_bytes().unwrap();
        assert_eq!(&wire[0..4], b"KWRD");
        assert_eq!(BrokerFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn ack_roundtrip_keeps_outcome() {
        let frame = BrokerFrame::SubAck {
            request_id: 9,
            outcome: Outcome::Rejected { reason: "nope".to_string() },
        };

        let wire = frame.to_bytes().unwrap();
        assert_eq!(BrokerFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn reject_truncated_body() {
        let wire = BrokerFrame::ConnAck.to_bytes().unwrap();
        let result = BrokerFrame::decode(&wire[..wire.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })));
    }

    #[test]
    fn reject_garbage_body() {
        let mut wire = FrameHeader::new(3).to_bytes().to_vec();
        wire.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(BrokerFrame::decode(&wire), Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn reject_oversized_payload_on_encode() {
        let frame = BrokerFrame::Publish {
            topic: "t".to_string(),
            payload: Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]),
        };
        assert!(matches!(frame.to_bytes(), Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn max_payload_fits() {
        let frame = BrokerFrame::Message {
            topic: "t".repeat(crate::MAX_TOPIC_LEN),
            payload: Bytes::from(vec![0xAB; MAX_PAYLOAD_SIZE]),
        };
        let wire = frame.to_bytes().unwrap();
        assert_eq!(BrokerFrame::decode(&wire).unwrap(), frame);
    }
}
