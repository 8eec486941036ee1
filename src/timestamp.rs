//! Session clock. All timestamps are measured from the session's start time (the 'epoch'):
//!
//! * RTP header timestamps and clock-sync timestamps tick at 10 kHz (100 microseconds per tick).
//!    The header carries the low 32 bits, clock sync the full 64 bits.
//! * Delta-times inside a MIDI command list count milliseconds, encoded as a big-endian base-128
//!    varint of at most 4 octets.
//!
//! Encoding and decoding both use these units, so a round trip only loses sub-millisecond
//!  precision of delta-times.

use std::time::{Duration, Instant};
use bytes::BufMut;

pub const TICKS_PER_SECOND: u64 = 10_000;
const MICROS_PER_TICK: u128 = 1_000_000 / TICKS_PER_SECOND as u128;

pub const DELTA_TIME_UNIT: Duration = Duration::from_millis(1);
pub const MAX_DELTA_OCTETS: usize = 4;
/// 4 octets with 7 payload bits each
pub const MAX_DELTA_VALUE: u32 = 0x0fff_ffff;

const DELTA_TIME_MASK: u8 = 0x7f;
const DELTA_TIME_HAS_NEXT: u8 = 0x80;

/// 64 bit tick count since `epoch`, as used by clock synchronization
pub fn sync_ticks(current_time: Instant, epoch: Instant) -> u64 {
    let ticks = current_time.saturating_duration_since(epoch).as_micros() / MICROS_PER_TICK;
    ticks.try_into().unwrap_or(u64::MAX)
}

/// RTP header timestamp: the tick count since `epoch`, wrapping at 2^32
pub fn now_ticks(current_time: Instant, epoch: Instant) -> u32 {
    sync_ticks(current_time, epoch) as u32
}

/// Writes the delta-time varint for a command that occurs `duration` after `base_time`.
///
/// The duration is quantized on the epoch's millisecond grid rather than on its own, so that a
///  sequence of deltas with sub-millisecond parts adds up to the same total as the absolute times.
pub fn encode_delta(base_time: Instant, epoch: Instant, duration: Duration, buf: &mut impl BufMut) {
    let start = base_time.saturating_duration_since(epoch).as_millis();
    let value = match base_time.checked_add(duration) {
        Some(end) => end.saturating_duration_since(epoch).as_millis() - start,
        None => MAX_DELTA_VALUE as u128,
    };
    put_delta_value(value.min(MAX_DELTA_VALUE as u128) as u32, buf);
}

/// Writes a raw delta value (in [DELTA_TIME_UNIT]s) with the minimal number of octets. Values
///  above [MAX_DELTA_VALUE] saturate.
pub fn put_delta_value(value: u32, buf: &mut impl BufMut) {
    let value = value.min(MAX_DELTA_VALUE);

    let mut started = false;
    for shift in [21, 14, 7] {
        let group = (value >> shift) as u8 & DELTA_TIME_MASK;
        if started || group != 0 {
            buf.put_u8(group | DELTA_TIME_HAS_NEXT);
            started = true;
        }
    }
    buf.put_u8(value as u8 & DELTA_TIME_MASK);
}

/// Reads a delta-time varint from the start of `buf`, returning the value and the number of
///  octets consumed. Reading stops after [MAX_DELTA_OCTETS] octets even if the last one has its
///  continuation bit set. Returns `None` if `buf` ends before the varint does.
pub fn decode_delta(buf: &[u8]) -> Option<(u32, usize)> {
    let mut value = 0u32;
    for (i, &octet) in buf.iter().take(MAX_DELTA_OCTETS).enumerate() {
        value = (value << 7) | (octet & DELTA_TIME_MASK) as u32;
        if octet & DELTA_TIME_HAS_NEXT == 0 || i + 1 == MAX_DELTA_OCTETS {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn delta_duration(value: u32) -> Duration {
    DELTA_TIME_UNIT * value
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case(vec![0x00], Some((0, 1)))]
    #[case(vec![0x7f], Some((127, 1)))]
    #[case(vec![0x81, 0x00], Some((128, 2)))]
    #[case(vec![0x81, 0x00, 0x55], Some((128, 2)))]
    #[case(vec![0xff, 0x7f], Some((0x3fff, 2)))]
    #[case(vec![0x81, 0x80, 0x80, 0x00], Some((0x20_0000, 4)))]
    #[case(vec![0xff, 0xff, 0xff, 0xff, 0x01], Some((MAX_DELTA_VALUE, 4)))]
    #[case(vec![0x81], None)]
    #[case(vec![], None)]
    fn test_decode_delta(#[case] buf: Vec<u8>, #[case] expected: Option<(u32, usize)>) {
        assert_eq!(decode_delta(&buf), expected);
    }

    #[rstest]
    #[case(0, vec![0x00])]
    #[case(127, vec![0x7f])]
    #[case(128, vec![0x81, 0x00])]
    #[case(0x3fff, vec![0xff, 0x7f])]
    #[case(0x4000, vec![0x81, 0x80, 0x00])]
    #[case(0x20_0000, vec![0x81, 0x80, 0x80, 0x00])]
    #[case(MAX_DELTA_VALUE, vec![0xff, 0xff, 0xff, 0x7f])]
    #[case(u32::MAX, vec![0xff, 0xff, 0xff, 0x7f])]
    fn test_put_delta_value(#[case] value: u32, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        put_delta_value(value, &mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_encode_delta_quantizes_on_epoch_grid() {
        let epoch = Instant::now();
        let base = epoch + Duration::from_micros(1_600);

        let mut buf = BytesMut::new();
        // 1.6ms -> 2.0ms crosses one millisecond boundary
        encode_delta(base, epoch, Duration::from_micros(400), &mut buf);
        assert_eq!(buf.as_ref(), &[0x01]);

        let mut buf = BytesMut::new();
        encode_delta(base, epoch, Duration::from_millis(200), &mut buf);
        assert_eq!(buf.as_ref(), &[0x81, 0x48]);
    }

    #[test]
    fn test_ticks() {
        let epoch = Instant::now();
        assert_eq!(sync_ticks(epoch, epoch), 0);
        assert_eq!(sync_ticks(epoch + Duration::from_millis(1), epoch), 10);
        assert_eq!(sync_ticks(epoch + Duration::from_secs(3), epoch), 30_000);
        assert_eq!(now_ticks(epoch + Duration::from_micros(250), epoch), 2);

        // before the epoch saturates to zero
        assert_eq!(sync_ticks(epoch, epoch + Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_now_ticks_wraps() {
        let epoch = Instant::now();
        let later = epoch + Duration::from_micros(100 * (u32::MAX as u64 + 6));
        assert_eq!(now_ticks(later, epoch), 5);
    }
}
