use std::time::Instant;
use bytes::{Buf, BufMut};

use crate::rtp::error::DecodeError;
use crate::rtp::message::MidiMessage;
use crate::timestamp;

pub const HEADER_LEN: usize = 12;
pub const RTP_VERSION: u8 = 2;
/// RTP-MIDI as used by Apple's network driver
pub const PAYLOAD_TYPE: u8 = 0x61;

const VERSION_SHIFT: u8 = 6;
const PADDING_BIT: u8 = 0x20;
const EXTENSION_BIT: u8 = 0x10;
const CC_MASK: u8 = 0x0f;
const MARKER_BIT: u8 = 0x80;
const PT_MASK: u8 = 0x7f;

/// The fixed 12 byte RTP header, all numbers in network byte order (BE):
///
/// ```ascii
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | V |P|X|  CC   |M|     PT      |        Sequence number        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The MIDI command section follows immediately. CSRC lists and header extensions are never
///  sent, and their flags are not acted upon when receiving.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RtpMidiHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpMidiHeader {
    pub fn new(sequence_number: u16, timestamp: u32, ssrc: u32) -> RtpMidiHeader {
        RtpMidiHeader {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: PAYLOAD_TYPE,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    pub fn for_message(message: &MidiMessage, epoch: Instant) -> RtpMidiHeader {
        RtpMidiHeader::new(
            message.sequence_number,
            timestamp::now_ticks(message.commands.timestamp, epoch),
            message.ssrc,
        )
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut first = (self.version & 0x03) << VERSION_SHIFT;
        if self.padding {
            first |= PADDING_BIT;
        }
        if self.extension {
            first |= EXTENSION_BIT;
        }
        first |= self.csrc_count & CC_MASK;

        let mut second = self.payload_type & PT_MASK;
        if self.marker {
            second |= MARKER_BIT;
        }

        buf.put_u8(first);
        buf.put_u8(second);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<RtpMidiHeader, DecodeError> {
        if buf.remaining() < HEADER_LEN {
            return Err(DecodeError::TooShort { len: buf.remaining() });
        }

        let first = buf.get_u8();
        let second = buf.get_u8();

        Ok(RtpMidiHeader {
            version: first >> VERSION_SHIFT,
            padding: first & PADDING_BIT != 0,
            extension: first & EXTENSION_BIT != 0,
            csrc_count: first & CC_MASK,
            marker: second & MARKER_BIT != 0,
            payload_type: second & PT_MASK,
            sequence_number: buf.get_u16(),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        })
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.payload_type != PAYLOAD_TYPE {
            return Err(DecodeError::PayloadTypeMismatch {
                expected: PAYLOAD_TYPE,
                actual: self.payload_type,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case(RtpMidiHeader::new(0, 0, 0), [0x80, 0x61, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])]
    #[case(RtpMidiHeader::new(0x1234, 0x01020304, 0xaabbccdd), [0x80, 0x61, 0x12, 0x34, 0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd])]
    #[case(RtpMidiHeader { marker: true, padding: true, extension: true, csrc_count: 3, ..RtpMidiHeader::new(65535, u32::MAX, 1) }, [0xb3, 0xe1, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 1])]
    fn test_ser_deser(#[case] header: RtpMidiHeader, #[case] expected: [u8; HEADER_LEN]) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        let deser = RtpMidiHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, header);
    }

    #[test]
    fn test_deser_too_short() {
        let mut b: &[u8] = &[0x80, 0x61, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        match RtpMidiHeader::deser(&mut b) {
            Err(DecodeError::TooShort { len }) => assert_eq!(len, 11),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_validate() {
        assert!(RtpMidiHeader::new(1, 2, 3).validate().is_ok());

        let header = RtpMidiHeader { payload_type: 0x60, ..RtpMidiHeader::new(1, 2, 3) };
        match header.validate() {
            Err(DecodeError::PayloadTypeMismatch { expected, actual }) => {
                assert_eq!(expected, 0x61);
                assert_eq!(actual, 0x60);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
