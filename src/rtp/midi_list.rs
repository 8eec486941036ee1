//! The MIDI command section following the RTP header:
//!
//! ```ascii
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |B|J|Z|P|LEN... |  MIDI list ...                                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! * B: 'big' header - LEN has 12 bits spanning a second octet instead of 4 bits
//! * J: a journal section follows the list. Journals are not parsed, trailing bytes are ignored.
//! * Z: the first command is preceded by a delta-time
//! * P: 'phantom' status byte, ignored
//!
//! The list itself is a sequence of `[delta-time] command` pairs, where the delta-time is omitted
//!  for the first command unless Z is set.

use std::time::Instant;
use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::midi::{self, DataLength, END_OF_EXCLUSIVE};
use crate::rtp::error::EncodeError;
use crate::rtp::message::{MidiCommand, MidiCommands};
use crate::timestamp;

const BIG_HEADER_BIT: u8 = 0x80;
const JOURNAL_BIT: u8 = 0x40;
const FIRST_DELTA_BIT: u8 = 0x20;
const PHANTOM_BIT: u8 = 0x10;
const LEN_MASK: u8 = 0x0f;

pub const MAX_COMPACT_LEN: usize = 0x0f;
pub const MAX_LIST_LEN: usize = 0x0fff;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MidiListHeader {
    pub big_header: bool,
    pub journal: bool,
    pub first_delta_time: bool,
    pub phantom: bool,
    pub len: u16,
}

impl MidiListHeader {
    pub fn serialized_len(&self) -> usize {
        if self.big_header { 2 } else { 1 }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut flags = 0;
        if self.journal {
            flags |= JOURNAL_BIT;
        }
        if self.first_delta_time {
            flags |= FIRST_DELTA_BIT;
        }
        if self.phantom {
            flags |= PHANTOM_BIT;
        }

        if self.big_header {
            buf.put_u8(flags | BIG_HEADER_BIT | ((self.len >> 8) as u8 & LEN_MASK));
            buf.put_u8(self.len as u8);
        }
        else {
            buf.put_u8(flags | (self.len as u8 & LEN_MASK));
        }
    }

    /// Returns `None` if a big header is announced but its second octet is missing
    pub fn deser(buf: &[u8]) -> Option<MidiListHeader> {
        let &first = buf.first()?;
        let big_header = first & BIG_HEADER_BIT != 0;

        let len = if big_header {
            let &second = buf.get(1)?;
            u16::from_be_bytes([first, second]) & 0x0fff
        }
        else {
            (first & LEN_MASK) as u16
        };

        Some(MidiListHeader {
            big_header,
            journal: first & JOURNAL_BIT != 0,
            first_delta_time: first & FIRST_DELTA_BIT != 0,
            phantom: first & PHANTOM_BIT != 0,
            len,
        })
    }
}

/// Reason for stopping before the end of a command list
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListFault {
    Incomplete { needed: usize, available: usize },
    MissingStatusByte { offset: usize, byte: u8 },
}

/// Parses the commands of a list whose header was already read. `list` starts immediately after
///  the list header and may extend beyond the list (e.g. into a journal section).
///
/// Parsing stops at the first fault; all commands decoded up to that point are returned along
///  with the fault.
pub fn parse_commands(list: &[u8], header: &MidiListHeader) -> (Vec<MidiCommand>, Option<ListFault>) {
    let declared_len = header.len as usize;
    let available_len = declared_len.min(list.len());
    let list = &list[..available_len];

    let mut commands = Vec::new();
    let mut offset = 0;
    let mut last_status_byte: Option<u8> = None;
    // set after a dropped SysEx: the interrupting status byte starts the next command, and the
    //  delta-time before the SysEx applies to it
    let mut resume_at_status = false;
    let mut delta = 0;

    while offset < list.len() {
        // NB: this counts *emitted* commands, so a dropped SysEx at the start of the list does
        //      not cause the next command to expect a delta-time
        if !resume_at_status {
            delta = 0;
            if !commands.is_empty() || header.first_delta_time {
                match timestamp::decode_delta(&list[offset..]) {
                    Some((value, num_octets)) => {
                        delta = value;
                        offset += num_octets;
                    }
                    None => {
                        let available = list.len() - offset;
                        return (commands, Some(ListFault::Incomplete { needed: available + 1, available }));
                    }
                }
            }
        }
        resume_at_status = false;

        let Some(&candidate) = list.get(offset) else {
            return (commands, Some(ListFault::Incomplete { needed: 1, available: 0 }));
        };

        let has_own_status_byte = midi::is_status_byte(candidate);
        let status = if has_own_status_byte {
            offset += 1;
            candidate
        }
        else {
            match last_status_byte {
                Some(status) => status,
                None => {
                    return (commands, Some(ListFault::MissingStatusByte { offset, byte: candidate }));
                }
            }
        };

        let remaining = &list[offset..];
        let data_len = match midi::data_length(status) {
            DataLength::Fixed(n) => n,
            DataLength::UntilEndOfExclusive => {
                match remaining.iter().position(|&b| midi::is_status_byte(b)) {
                    Some(pos) if remaining[pos] == END_OF_EXCLUSIVE => pos + 1,
                    Some(pos) => {
                        trace!("SysEx interrupted by status byte {:#04x} - dropping {} bytes", remaining[pos], pos + 1);
                        offset += pos;
                        resume_at_status = true;
                        continue;
                    }
                    None => {
                        return (commands, Some(ListFault::Incomplete { needed: remaining.len() + 1, available: remaining.len() }));
                    }
                }
            }
        };

        if !has_own_status_byte && data_len == 0 {
            // running status for a command without data would consume nothing
            return (commands, Some(ListFault::MissingStatusByte { offset, byte: candidate }));
        }

        if has_own_status_byte {
            last_status_byte = Some(status);
        }

        if remaining.len() < data_len {
            return (commands, Some(ListFault::Incomplete { needed: data_len, available: remaining.len() }));
        }

        let mut payload = BytesMut::with_capacity(1 + data_len);
        payload.put_u8(status);
        payload.put_slice(&remaining[..data_len]);
        offset += data_len;

        commands.push(MidiCommand {
            delta_time: timestamp::delta_duration(delta),
            payload: payload.freeze(),
        });
    }

    if declared_len > available_len {
        return (commands, Some(ListFault::Incomplete { needed: declared_len, available: available_len }));
    }
    (commands, None)
}

/// Writes list header and list body. An empty command list is written as a single zero header
///  octet.
pub fn encode_commands(commands: &MidiCommands, epoch: Instant, buf: &mut BytesMut) -> Result<(), EncodeError> {
    if commands.is_empty() {
        MidiListHeader::default().ser(buf);
        return Ok(());
    }

    let mut header = MidiListHeader::default();
    let body = encode_body(commands, epoch, &mut header);

    if body.len() > MAX_LIST_LEN {
        return Err(EncodeError::ListTooLong { len: body.len(), max: MAX_LIST_LEN });
    }
    header.big_header = body.len() > MAX_COMPACT_LEN;
    header.len = body.len() as u16;

    header.ser(buf);
    buf.put_slice(&body);
    Ok(())
}

/// Checks that a command list can be encoded without actually writing it anywhere
pub fn check_encodable(commands: &MidiCommands, epoch: Instant) -> Result<(), EncodeError> {
    let body = encode_body(commands, epoch, &mut MidiListHeader::default());
    if body.len() > MAX_LIST_LEN {
        return Err(EncodeError::ListTooLong { len: body.len(), max: MAX_LIST_LEN });
    }
    Ok(())
}

fn encode_body(commands: &MidiCommands, epoch: Instant, header: &mut MidiListHeader) -> BytesMut {
    let mut body = BytesMut::new();
    let mut at = commands.timestamp;

    for (i, command) in commands.iter().enumerate() {
        if i == 0 && !command.delta_time.is_zero() {
            header.first_delta_time = true;
            timestamp::encode_delta(at, epoch, command.delta_time, &mut body);
        }
        if i > 0 {
            timestamp::encode_delta(at, epoch, command.delta_time, &mut body);
        }
        at = at.checked_add(command.delta_time).unwrap_or(at);

        body.put_slice(&command.payload);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;

    fn compact(len: u16) -> MidiListHeader {
        MidiListHeader { len, ..Default::default() }
    }

    fn payloads(commands: &[MidiCommand]) -> Vec<Vec<u8>> {
        commands.iter()
            .map(|c| c.payload.to_vec())
            .collect()
    }

    #[rstest]
    #[case(vec![0x00], MidiListHeader::default())]
    #[case(vec![0x03], compact(3))]
    #[case(vec![0x2f], MidiListHeader { first_delta_time: true, ..compact(15) })]
    #[case(vec![0x50], MidiListHeader { journal: true, phantom: true, ..compact(0) })]
    #[case(vec![0x80, 0x10], MidiListHeader { big_header: true, ..compact(16) })]
    #[case(vec![0xaf, 0xff], MidiListHeader { big_header: true, first_delta_time: true, ..compact(4095) })]
    fn test_header_ser_deser(#[case] raw: Vec<u8>, #[case] header: MidiListHeader) {
        assert_eq!(MidiListHeader::deser(&raw), Some(header));
        assert_eq!(header.serialized_len(), raw.len());

        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), raw.as_slice());
    }

    #[test]
    fn test_header_deser_missing_second_octet() {
        assert_eq!(MidiListHeader::deser(&[0x80]), None);
        assert_eq!(MidiListHeader::deser(&[]), None);
    }

    #[rstest]
    #[case::single_note_on(vec![0x90, 0x3c, 0x40], false, vec![vec![0x90, 0x3c, 0x40]])]
    #[case::running_status(vec![0x91, 0x3c, 0x40, 0x00, 0x3e, 0x41], false, vec![vec![0x91, 0x3c, 0x40], vec![0x91, 0x3e, 0x41]])]
    #[case::program_change(vec![0xc2, 0x05, 0x00, 0xc2, 0x06], false, vec![vec![0xc2, 0x05], vec![0xc2, 0x06]])]
    #[case::realtime(vec![0xf8, 0x00, 0xfa], false, vec![vec![0xf8], vec![0xfa]])]
    #[case::undefined_status(vec![0xf4, 0x00, 0x80, 0x3c, 0x00], false, vec![vec![0xf4], vec![0x80, 0x3c, 0x00]])]
    #[case::first_delta(vec![0x81, 0x00, 0x90, 0x3c, 0x40], true, vec![vec![0x90, 0x3c, 0x40]])]
    #[case::sysex(vec![0xf0, 0x01, 0x02, 0xf7], false, vec![vec![0xf0, 0x01, 0x02, 0xf7]])]
    #[case::sysex_then_note(vec![0xf0, 0x7e, 0xf7, 0x00, 0x90, 0x3c, 0x40], false, vec![vec![0xf0, 0x7e, 0xf7], vec![0x90, 0x3c, 0x40]])]
    #[case::unterminated_sysex(vec![0xf0, 0x01, 0x02, 0x90, 0x3c, 0x40], false, vec![vec![0x90, 0x3c, 0x40]])]
    #[case::unterminated_sysex_after_command(vec![0x90, 0x3c, 0x40, 0x00, 0xf0, 0x01, 0x02, 0x90, 0x3e, 0x40], false, vec![vec![0x90, 0x3c, 0x40], vec![0x90, 0x3e, 0x40]])]
    #[case::running_status_after_dropped_sysex(vec![0x90, 0x3c, 0x40, 0x00, 0xf0, 0x01, 0x02, 0x80, 0x3c, 0x00, 0x00, 0x3e, 0x00], false, vec![vec![0x90, 0x3c, 0x40], vec![0x80, 0x3c, 0x00], vec![0x80, 0x3e, 0x00]])]
    fn test_parse_commands(#[case] list: Vec<u8>, #[case] z: bool, #[case] expected: Vec<Vec<u8>>) {
        let header = MidiListHeader { first_delta_time: z, ..compact(list.len() as u16) };
        let (commands, fault) = parse_commands(&list, &header);
        assert_eq!(fault, None);
        assert_eq!(payloads(&commands), expected);
    }

    #[test]
    fn test_parse_delta_times() {
        let list = [0x81, 0x00, 0x90, 0x3c, 0x40, 0x05, 0x80, 0x3c, 0x00, 0x00, 0xf8];
        let header = MidiListHeader { first_delta_time: true, ..compact(list.len() as u16) };

        let (commands, fault) = parse_commands(&list, &header);
        assert_eq!(fault, None);
        let deltas = commands.iter()
            .map(|c| c.delta_time)
            .collect::<Vec<_>>();
        assert_eq!(deltas, vec![Duration::from_millis(128), Duration::from_millis(5), Duration::ZERO]);
    }

    #[test]
    fn test_parse_ignores_trailing_journal() {
        let list = [0x90, 0x3c, 0x40, 0x12, 0x34, 0x56];
        let header = MidiListHeader { journal: true, ..compact(3) };
        let (commands, fault) = parse_commands(&list, &header);
        assert_eq!(fault, None);
        assert_eq!(payloads(&commands), vec![vec![0x90, 0x3c, 0x40]]);
    }

    #[rstest]
    #[case::truncated_data(vec![0x90, 0x3c, 0x40, 0x00, 0x80, 0x3c], 1, ListFault::Incomplete { needed: 2, available: 1 })]
    #[case::truncated_delta(vec![0x90, 0x3c, 0x40, 0x81], 1, ListFault::Incomplete { needed: 2, available: 1 })]
    #[case::truncated_long_delta(vec![0x90, 0x3c, 0x40, 0x81, 0x80, 0x80], 1, ListFault::Incomplete { needed: 4, available: 3 })]
    #[case::delta_without_command(vec![0x90, 0x3c, 0x40, 0x00], 1, ListFault::Incomplete { needed: 1, available: 0 })]
    #[case::sysex_without_end(vec![0xf0, 0x01, 0x02], 0, ListFault::Incomplete { needed: 3, available: 2 })]
    #[case::no_status(vec![0x3c, 0x40], 0, ListFault::MissingStatusByte { offset: 0, byte: 0x3c })]
    #[case::running_status_without_data(vec![0xf8, 0x00, 0x3c], 1, ListFault::MissingStatusByte { offset: 2, byte: 0x3c })]
    #[case::unterminated_sysex_then_truncated(vec![0xf0, 0x01, 0x02, 0x90], 0, ListFault::Incomplete { needed: 2, available: 0 })]
    fn test_parse_faults(#[case] list: Vec<u8>, #[case] num_complete: usize, #[case] expected_fault: ListFault) {
        let header = compact(list.len() as u16);
        let (commands, fault) = parse_commands(&list, &header);
        assert_eq!(commands.len(), num_complete);
        assert_eq!(fault, Some(expected_fault));
    }

    #[test]
    fn test_parse_declared_len_beyond_buffer() {
        let list = [0x90, 0x3c, 0x40];
        let header = compact(6);
        let (commands, fault) = parse_commands(&list, &header);
        assert_eq!(payloads(&commands), vec![vec![0x90, 0x3c, 0x40]]);
        assert_eq!(fault, Some(ListFault::Incomplete { needed: 6, available: 3 }));
    }

    fn commands_of_len(total_len: usize) -> MidiCommands {
        // a single SysEx command of the requested total length
        let mut payload = vec![0xf0];
        payload.resize(total_len - 1, 0x01);
        payload.push(0xf7);
        MidiCommands::new(vec![MidiCommand::new(payload)])
    }

    #[test]
    fn test_encode_empty() {
        let mut buf = BytesMut::new();
        encode_commands(&MidiCommands::new(vec![]), Instant::now(), &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00]);
    }

    #[rstest]
    #[case(3, 1)]
    #[case(15, 1)]
    #[case(16, 2)]
    #[case(4095, 2)]
    fn test_encode_header_width(#[case] body_len: usize, #[case] header_len: usize) {
        let commands = commands_of_len(body_len);
        let mut buf = BytesMut::new();
        encode_commands(&commands, commands.timestamp, &mut buf).unwrap();

        assert_eq!(buf.len(), header_len + body_len);
        let header = MidiListHeader::deser(&buf).unwrap();
        assert_eq!(header.big_header, header_len == 2);
        assert_eq!(header.len as usize, body_len);
        assert!(!header.first_delta_time);
    }

    #[test]
    fn test_encode_too_long() {
        let commands = commands_of_len(4096);
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_commands(&commands, commands.timestamp, &mut buf),
            Err(EncodeError::ListTooLong { len: 4096, max: 4095 }),
        );
        assert!(buf.is_empty());
        assert!(check_encodable(&commands, commands.timestamp).is_err());
        assert!(check_encodable(&commands_of_len(4095), commands.timestamp).is_ok());
    }

    #[test]
    fn test_encode_delta_times() {
        let epoch = Instant::now();
        let commands = MidiCommands {
            timestamp: epoch,
            commands: vec![
                MidiCommand::with_delta(Duration::from_millis(2), vec![0x90, 0x3c, 0x40]),
                MidiCommand::new(vec![0x90, 0x3e, 0x40]),
                MidiCommand::with_delta(Duration::from_millis(130), vec![0x80, 0x3c, 0x00]),
            ],
        };

        let mut buf = BytesMut::new();
        encode_commands(&commands, epoch, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[
            0x2d, // Z, len 13
            0x02, 0x90, 0x3c, 0x40,
            0x00, 0x90, 0x3e, 0x40,
            0x81, 0x02, 0x80, 0x3c, 0x00,
        ]);
    }
}
