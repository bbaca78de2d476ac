//! Typed message bodies
//!
//! Body layouts (all integers and floats little-endian):
//! - CONNECTION-ANNOUNCE: participant kind (1)
//! - STEP-RELEASE / STEP-ACK: current time (f64) + step duration (f64)
//! - ATTRIBUTE-UPDATE: simulation time (f64) + name (u16 len + UTF-8) + value (f64)
//! - LINK-TABLE: entry count (u16) + entries of two length-prefixed names
//! - RUN-COMPLETE: final time (f64)

use bytes::{Buf, BufMut};

use cosim_core::{AttributeLinks, CosimError, CosimResult};

use crate::{MessageKind, ParticipantKind};

/// Registration of a node with the scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ConnectionAnnounce {
    pub participant_kind: ParticipantKind,
}

/// Permission to execute one step; echoed back as the acknowledgement
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepRelease {
    pub current_time: f64,
    pub step_duration: f64,
}

impl StepRelease {
    pub fn new(current_time: f64, step_duration: f64) -> Self {
        StepRelease {
            current_time,
            step_duration,
        }
    }
}

/// One named value produced by a node
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeUpdate {
    pub simulation_time: f64,
    pub attribute_name: String,
    pub attribute_value: f64,
}

/// Rename table installed on a node before the run starts
#[derive(Clone, Debug, PartialEq, Default)]
pub struct LinkTable {
    pub links: AttributeLinks,
}

/// Final message of a run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunComplete {
    pub final_time: f64,
}

/// Envelope body - the kind discriminator is derived from the variant,
/// so a kind/body mismatch cannot be constructed
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    ConnectionAnnounce(ConnectionAnnounce),
    StepRelease(StepRelease),
    AttributeUpdate(AttributeUpdate),
    LinkTable(LinkTable),
    StepAck(StepRelease),
    RunComplete(RunComplete),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::ConnectionAnnounce(_) => MessageKind::ConnectionAnnounce,
            Payload::StepRelease(_) => MessageKind::StepRelease,
            Payload::AttributeUpdate(_) => MessageKind::AttributeUpdate,
            Payload::LinkTable(_) => MessageKind::LinkTable,
            Payload::StepAck(_) => MessageKind::StepAck,
            Payload::RunComplete(_) => MessageKind::RunComplete,
        }
    }

    /// Serialize the body (without kind or length prefix)
    pub fn encode_body(&self, buf: &mut impl BufMut) -> CosimResult<()> {
        match self {
            Payload::ConnectionAnnounce(c) => buf.put_u8(c.participant_kind.to_byte()),
            Payload::StepRelease(r) | Payload::StepAck(r) => {
                buf.put_f64_le(r.current_time);
                buf.put_f64_le(r.step_duration);
            }
            Payload::AttributeUpdate(a) => {
                buf.put_f64_le(a.simulation_time);
                put_str(buf, &a.attribute_name)?;
                buf.put_f64_le(a.attribute_value);
            }
            Payload::LinkTable(t) => {
                let count = u16::try_from(t.links.len()).map_err(|_| {
                    CosimError::InvalidWireFormat(format!(
                        "link table too large: {} entries",
                        t.links.len()
                    ))
                })?;
                buf.put_u16_le(count);
                for (produced, local) in t.links.iter() {
                    put_str(buf, produced)?;
                    put_str(buf, local)?;
                }
            }
            Payload::RunComplete(r) => buf.put_f64_le(r.final_time),
        }
        Ok(())
    }

    /// Parse a body for the given kind. The body must be consumed exactly.
    pub fn decode_body(kind: MessageKind, body: &[u8]) -> CosimResult<Self> {
        let mut reader = BodyReader::new(kind, body);

        let payload = match kind {
            MessageKind::ConnectionAnnounce => {
                let b = reader.u8()?;
                let participant_kind = ParticipantKind::from_byte(b)
                    .ok_or(CosimError::UnknownParticipantKind(b))?;
                Payload::ConnectionAnnounce(ConnectionAnnounce { participant_kind })
            }
            MessageKind::StepRelease => Payload::StepRelease(reader.step_release()?),
            MessageKind::StepAck => Payload::StepAck(reader.step_release()?),
            MessageKind::AttributeUpdate => {
                let simulation_time = reader.f64()?;
                let attribute_name = reader.string()?;
                let attribute_value = reader.f64()?;
                Payload::AttributeUpdate(AttributeUpdate {
                    simulation_time,
                    attribute_name,
                    attribute_value,
                })
            }
            MessageKind::LinkTable => {
                let count = reader.u16()?;
                let mut links = AttributeLinks::new();
                for _ in 0..count {
                    let produced = reader.string()?;
                    let local = reader.string()?;
                    links.insert(produced, local);
                }
                Payload::LinkTable(LinkTable { links })
            }
            MessageKind::RunComplete => Payload::RunComplete(RunComplete {
                final_time: reader.f64()?,
            }),
        };

        reader.finish()?;
        Ok(payload)
    }
}

fn put_str(buf: &mut impl BufMut, s: &str) -> CosimResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| CosimError::InvalidWireFormat(format!("string too long: {} bytes", s.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Cursor over a body that reports failures against the declared kind
struct BodyReader<'a> {
    kind: MessageKind,
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn new(kind: MessageKind, buf: &'a [u8]) -> Self {
        BodyReader { kind, buf }
    }

    fn malformed(&self, reason: impl Into<String>) -> CosimError {
        CosimError::MalformedEnvelope {
            kind: self.kind.name(),
            reason: reason.into(),
        }
    }

    fn need(&self, n: usize) -> CosimResult<()> {
        if self.buf.remaining() < n {
            return Err(self.malformed(format!(
                "body truncated: need {} more bytes, {} left",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> CosimResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> CosimResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    fn f64(&mut self) -> CosimResult<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64_le())
    }

    fn string(&mut self) -> CosimResult<String> {
        let len = self.u16()? as usize;
        self.need(len)?;
        let (raw, rest) = self.buf.split_at(len);
        let s = std::str::from_utf8(raw)
            .map_err(|_| self.malformed("name is not valid UTF-8"))?
            .to_string();
        self.buf = rest;
        Ok(s)
    }

    fn step_release(&mut self) -> CosimResult<StepRelease> {
        let current_time = self.f64()?;
        let step_duration = self.f64()?;
        Ok(StepRelease {
            current_time,
            step_duration,
        })
    }

    fn finish(self) -> CosimResult<()> {
        if self.buf.has_remaining() {
            return Err(self.malformed(format!("{} trailing bytes", self.buf.remaining())));
        }
        Ok(())
    }
}
