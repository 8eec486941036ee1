//! Codec for RTP-MIDI packets on the data channel: a fixed RTP header followed by a MIDI command
//!  list.

pub mod error;
pub mod header;
pub mod message;
pub mod midi_list;

use std::time::Instant;
use bytes::{Bytes, BytesMut};

pub use error::{DecodeError, EncodeError};
pub use header::RtpMidiHeader;
pub use message::{MidiCommand, MidiCommands, MidiMessage};

use midi_list::{ListFault, MidiListHeader};

/// Decodes a datagram, using the current time as the command list's timestamp
pub fn decode(buffer: &[u8]) -> Result<MidiMessage, DecodeError> {
    decode_at(buffer, Instant::now())
}

/// Decodes a datagram received at `received_at`.
///
/// A datagram consisting of nothing but the RTP header yields a message without commands.
pub fn decode_at(buffer: &[u8], received_at: Instant) -> Result<MidiMessage, DecodeError> {
    let mut buf = buffer;
    let header = RtpMidiHeader::deser(&mut buf)?;
    header.validate()?;

    let mut message = MidiMessage {
        sequence_number: header.sequence_number,
        ssrc: header.ssrc,
        commands: MidiCommands {
            timestamp: received_at,
            commands: Vec::new(),
        },
    };

    if buf.is_empty() {
        return Ok(message);
    }

    let Some(list_header) = MidiListHeader::deser(buf) else {
        return Err(DecodeError::IncompleteCommand {
            needed: 2,
            available: buf.len(),
            partial: Box::new(message),
        });
    };

    let (commands, fault) = midi_list::parse_commands(&buf[list_header.serialized_len()..], &list_header);
    message.commands.commands = commands;

    match fault {
        None => Ok(message),
        Some(ListFault::Incomplete { needed, available }) => Err(DecodeError::IncompleteCommand {
            needed,
            available,
            partial: Box::new(message),
        }),
        Some(ListFault::MissingStatusByte { offset, byte }) => Err(DecodeError::MissingStatusByte {
            offset,
            byte,
            partial: Box::new(message),
        }),
    }
}

/// Encodes a message. Delta-times and the header timestamp are expressed relative to `epoch`,
///  which is normally the sending session's start time.
pub fn encode(message: &MidiMessage, epoch: Instant) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(header::HEADER_LEN + 2 + message.commands.len() * 4);
    RtpMidiHeader::for_message(message, epoch).ser(&mut buf);
    midi_list::encode_commands(&message.commands, epoch, &mut buf)?;
    Ok(buf.freeze())
}
