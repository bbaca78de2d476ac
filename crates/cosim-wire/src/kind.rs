//! Message and participant kind discriminators

/// Envelope discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Node -> scheduler, once after subscribing
    ConnectionAnnounce = 0x01,
    /// Scheduler -> block, permission to execute one step
    StepRelease = 0x02,
    /// Node -> peers, one named value
    AttributeUpdate = 0x03,
    /// Setup -> node, attribute rename table
    LinkTable = 0x04,
    /// Node -> scheduler, step finished
    StepAck = 0x05,
    /// Scheduler -> all nodes, step sequence exhausted
    RunComplete = 0x06,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageKind::ConnectionAnnounce),
            0x02 => Some(MessageKind::StepRelease),
            0x03 => Some(MessageKind::AttributeUpdate),
            0x04 => Some(MessageKind::LinkTable),
            0x05 => Some(MessageKind::StepAck),
            0x06 => Some(MessageKind::RunComplete),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::ConnectionAnnounce => "CONNECTION-ANNOUNCE",
            MessageKind::StepRelease => "STEP-RELEASE",
            MessageKind::AttributeUpdate => "ATTRIBUTE-UPDATE",
            MessageKind::LinkTable => "LINK-TABLE",
            MessageKind::StepAck => "STEP-ACK",
            MessageKind::RunComplete => "RUN-COMPLETE",
        }
    }
}

/// What kind of simulator a participant wraps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ParticipantKind {
    #[default]
    Other = 0x00,
    /// Functional mock-up unit
    Fmu = 0x01,
    /// Hand-written script model
    Script = 0x02,
}

impl ParticipantKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(ParticipantKind::Other),
            0x01 => Some(ParticipantKind::Fmu),
            0x02 => Some(ParticipantKind::Script),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}
