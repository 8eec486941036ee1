//! Static lookup of how many data bytes follow a MIDI status byte. The codec uses this to find
//!  the end of a command inside an RTP-MIDI command list - it does not interpret the commands.

pub const SYSTEM_EXCLUSIVE: u8 = 0xf0;
pub const END_OF_EXCLUSIVE: u8 = 0xf7;

/// Number of data bytes following a status byte
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DataLength {
    Fixed(usize),
    /// System Exclusive: data runs until the End-of-Exclusive status byte
    UntilEndOfExclusive,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CommandInfo {
    pub status: u8,
    pub data_length: DataLength,
    pub name: &'static str,
}

const fn fixed(status: u8, len: usize, name: &'static str) -> CommandInfo {
    CommandInfo { status, data_length: DataLength::Fixed(len), name }
}

static COMMAND_INFOS: [CommandInfo; 19] = [
    // channel messages, keyed by high nibble
    fixed(0x80, 2, "noteOff"),
    fixed(0x90, 2, "noteOn"),
    fixed(0xa0, 2, "polyphonicAftertouch"),
    fixed(0xb0, 2, "controlChange"),
    fixed(0xc0, 1, "programChange"),
    fixed(0xd0, 1, "channelAftertouch"),
    fixed(0xe0, 2, "pitchBend"),

    // system common
    CommandInfo { status: SYSTEM_EXCLUSIVE, data_length: DataLength::UntilEndOfExclusive, name: "systemExclusive" },
    fixed(0xf1, 1, "quarterFrame"),
    fixed(0xf2, 2, "songPosition"),
    fixed(0xf3, 1, "songSelect"),
    fixed(0xf6, 0, "tuneRequest"),

    // system realtime
    fixed(0xf8, 0, "clock"),
    fixed(0xfa, 0, "start"),
    fixed(0xfb, 0, "continue"),
    fixed(0xfc, 0, "stop"),
    fixed(0xfe, 0, "activeSensing"),
    fixed(0xff, 0, "reset"),

    // 0xf7 only terminates SysEx - it never starts a command of its own
    fixed(END_OF_EXCLUSIVE, 0, "endOfExclusive"),
];

/// Looks up a status byte, falling back to its high nibble for channel messages. Undefined
///  system statuses (0xf4, 0xf5, 0xf9, 0xfd) are not found.
pub fn command_info(status: u8) -> Option<&'static CommandInfo> {
    COMMAND_INFOS.iter()
        .find(|info| info.status == status)
        .or_else(|| {
            if status < 0xf0 {
                COMMAND_INFOS.iter().find(|info| info.status == status & 0xf0)
            }
            else {
                None
            }
        })
}

/// Data bytes following `status`. Unknown statuses carry no data.
pub fn data_length(status: u8) -> DataLength {
    command_info(status)
        .map(|info| info.data_length)
        .unwrap_or(DataLength::Fixed(0))
}

pub fn is_status_byte(b: u8) -> bool {
    b & 0x80 != 0
}
