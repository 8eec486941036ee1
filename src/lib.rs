pub mod control;
pub mod midi;
pub mod rtp;
pub mod session;
pub mod timestamp;
pub mod test_util;
