use thiserror::Error;

use crate::rtp::message::MidiMessage;

/// Reasons for rejecting a data-channel datagram.
///
/// Errors raised while parsing the MIDI command list carry the message with all commands decoded
///  before the failure, so that receivers can still deliver them.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer is too short: {len} bytes")]
    TooShort { len: usize },

    #[error("payload type mismatch: expected {expected:#04x}, got {actual:#04x}")]
    PayloadTypeMismatch { expected: u8, actual: u8 },

    #[error("not enough buffer data for the next command: {needed} bytes required, {available} available")]
    IncompleteCommand { needed: usize, available: usize, partial: Box<MidiMessage> },

    #[error("data byte {byte:#04x} at list offset {offset} without a status byte")]
    MissingStatusByte { offset: usize, byte: u8, partial: Box<MidiMessage> },
}

impl DecodeError {
    /// The commands decoded before the failure, if the header was valid
    pub fn partial(&self) -> Option<&MidiMessage> {
        match self {
            DecodeError::TooShort { .. } | DecodeError::PayloadTypeMismatch { .. } => None,
            DecodeError::IncompleteCommand { partial, .. } | DecodeError::MissingStatusByte { partial, .. } => Some(partial),
        }
    }

    pub fn into_partial(self) -> Option<MidiMessage> {
        match self {
            DecodeError::TooShort { .. } | DecodeError::PayloadTypeMismatch { .. } => None,
            DecodeError::IncompleteCommand { partial, .. } | DecodeError::MissingStatusByte { partial, .. } => Some(*partial),
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum EncodeError {
    #[error("MIDI list of {len} bytes exceeds the maximum of {max} bytes")]
    ListTooLong { len: usize, max: usize },
}
