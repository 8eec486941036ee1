use std::fmt::{Debug, Display, Formatter};
use std::time::{Duration, Instant};
use bytes::Bytes;

/// One RTP-MIDI packet on the data channel
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MidiMessage {
    pub sequence_number: u16,
    pub ssrc: u32,
    pub commands: MidiCommands,
}

impl Display for MidiMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RM SSRC={:#x} sn={} commands={}", self.ssrc, self.sequence_number, self.commands.commands.len())
    }
}

/// The command list of a [MidiMessage], together with the point in time the list refers to:
///  receipt time for decoded messages, construction time for outgoing ones. Delta-times are
///  relative to this timestamp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MidiCommands {
    pub timestamp: Instant,
    pub commands: Vec<MidiCommand>,
}

impl MidiCommands {
    pub fn new(commands: Vec<MidiCommand>) -> MidiCommands {
        MidiCommands {
            timestamp: Instant::now(),
            commands,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiCommand> {
        self.commands.iter()
    }
}

impl From<Vec<MidiCommand>> for MidiCommands {
    fn from(commands: Vec<MidiCommand>) -> Self {
        MidiCommands::new(commands)
    }
}

/// A single MIDI command. After decoding, the payload always starts with its status byte, even if
///  the sender used running status on the wire.
#[derive(Clone, Eq, PartialEq)]
pub struct MidiCommand {
    /// time since the previous command in the list, or since the list's timestamp for the first one
    pub delta_time: Duration,
    pub payload: Bytes,
}

impl Debug for MidiCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MidiCommand{{+{:?} {:02x?}}}", self.delta_time, self.payload.as_ref())
    }
}

impl MidiCommand {
    pub fn new(payload: impl Into<Bytes>) -> MidiCommand {
        MidiCommand {
            delta_time: Duration::ZERO,
            payload: payload.into(),
        }
    }

    pub fn with_delta(delta_time: Duration, payload: impl Into<Bytes>) -> MidiCommand {
        MidiCommand {
            delta_time,
            payload: payload.into(),
        }
    }

    pub fn status(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}
