//! Envelope for the cosim wire protocol
//!
//! Layout:
//! - Byte 0: Wire version
//! - Byte 1: Message kind
//! - Bytes 2-3: Sender length (LE)
//! - Sender id (UTF-8)
//! - 4 bytes: Body length (LE)
//! - Body (see `payload`)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use cosim_core::{CosimError, CosimResult, NodeId};

use crate::{
    AttributeUpdate, ConnectionAnnounce, LinkTable, MessageKind, ParticipantKind, Payload,
    RunComplete, StepRelease,
};

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Size of version + kind + sender length
pub const PREAMBLE_SIZE: usize = 4;

/// Size of the body length field
pub const BODY_LEN_SIZE: usize = 4;

/// Immutable message envelope
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    sender: NodeId,
    payload: Payload,
}

impl Envelope {
    pub fn new(sender: NodeId, payload: Payload) -> Self {
        Envelope { sender, payload }
    }

    pub fn announce(sender: NodeId, participant_kind: ParticipantKind) -> Self {
        Self::new(
            sender,
            Payload::ConnectionAnnounce(ConnectionAnnounce { participant_kind }),
        )
    }

    pub fn step_release(sender: NodeId, current_time: f64, step_duration: f64) -> Self {
        Self::new(
            sender,
            Payload::StepRelease(StepRelease::new(current_time, step_duration)),
        )
    }

    pub fn step_ack(sender: NodeId, release: StepRelease) -> Self {
        Self::new(sender, Payload::StepAck(release))
    }

    pub fn attribute_update(
        sender: NodeId,
        simulation_time: f64,
        attribute_name: impl Into<String>,
        attribute_value: f64,
    ) -> Self {
        Self::new(
            sender,
            Payload::AttributeUpdate(AttributeUpdate {
                simulation_time,
                attribute_name: attribute_name.into(),
                attribute_value,
            }),
        )
    }

    pub fn link_table(sender: NodeId, table: LinkTable) -> Self {
        Self::new(sender, Payload::LinkTable(table))
    }

    pub fn run_complete(sender: NodeId, final_time: f64) -> Self {
        Self::new(sender, Payload::RunComplete(RunComplete { final_time }))
    }

    pub fn sender(&self) -> &NodeId {
        &self.sender
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (NodeId, Payload) {
        (self.sender, self.payload)
    }

    /// Serialize to bytes
    pub fn encode(&self) -> CosimResult<Bytes> {
        let sender = self.sender.as_str().as_bytes();
        let sender_len = u16::try_from(sender.len()).map_err(|_| {
            CosimError::InvalidWireFormat(format!("sender id too long: {} bytes", sender.len()))
        })?;

        let mut body = BytesMut::new();
        self.payload.encode_body(&mut body)?;
        let body_len = u32::try_from(body.len()).map_err(|_| {
            CosimError::InvalidWireFormat(format!("body too large: {} bytes", body.len()))
        })?;

        let mut buf =
            BytesMut::with_capacity(PREAMBLE_SIZE + sender.len() + BODY_LEN_SIZE + body.len());
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.kind().to_byte());
        buf.put_u16_le(sender_len);
        buf.put_slice(sender);
        buf.put_u32_le(body_len);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    /// Parse from bytes, rejecting unknown kinds and bodies that do not
    /// match their kind
    pub fn decode(bytes: &[u8]) -> CosimResult<Self> {
        let mut buf = bytes;

        if buf.remaining() < PREAMBLE_SIZE {
            return Err(CosimError::BufferTooShort {
                expected: PREAMBLE_SIZE,
                actual: buf.remaining(),
            });
        }

        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(CosimError::UnsupportedVersion(version));
        }

        let kind_byte = buf.get_u8();
        let kind =
            MessageKind::from_byte(kind_byte).ok_or(CosimError::UnknownMessageKind(kind_byte))?;

        let sender_len = buf.get_u16_le() as usize;
        let header_len = PREAMBLE_SIZE + sender_len + BODY_LEN_SIZE;
        if bytes.len() < header_len {
            return Err(CosimError::BufferTooShort {
                expected: header_len,
                actual: bytes.len(),
            });
        }

        let sender = std::str::from_utf8(&buf[..sender_len])
            .map_err(|_| CosimError::InvalidWireFormat("sender id is not valid UTF-8".into()))?;
        let sender = NodeId::new(sender);
        buf.advance(sender_len);

        let body_len = buf.get_u32_le() as usize;
        if buf.remaining() != body_len {
            return Err(CosimError::MalformedEnvelope {
                kind: kind.name(),
                reason: format!(
                    "declared body length {} but {} bytes follow",
                    body_len,
                    buf.remaining()
                ),
            });
        }

        let payload = Payload::decode_body(kind, buf)?;
        Ok(Envelope { sender, payload })
    }
}
