//! Apple MIDI session control packets. They share both ports with RTP-MIDI data and are told
//!  apart by a leading `0xFFFF` marker, followed by a two-letter ASCII command.

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Display, Formatter};

pub const CONTROL_MARKER: u16 = 0xffff;
pub const PROTOCOL_VERSION: u32 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ControlCommand {
    /// 'IN'
    Invitation = 0x494e,
    /// 'OK'
    InvitationAccepted = 0x4f4b,
    /// 'NO'
    InvitationRejected = 0x4e4f,
    /// 'BY'
    End = 0x4259,
    /// 'CK'
    Synchronization = 0x434b,
    /// 'RS'
    ReceiverFeedback = 0x5253,
    /// 'RL'
    BitrateLimit = 0x524c,
}

/// The only distinction the session's dispatch cares about
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ControlKind {
    Invitation,
    End,
    Other,
}

/// `IN`, `OK`, `NO` and `BY` packets:
///
/// ```ascii
/// | 0xFFFF | command (2) | protocol version (4) | initiator token (4) | SSRC (4) | [name, NUL terminated]
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExchangePacket {
    pub command: ControlCommand,
    pub protocol_version: u32,
    pub initiator_token: u32,
    pub ssrc: u32,
    pub name: Option<String>,
}

impl ExchangePacket {
    /// The reply accepting an invitation
    pub fn accept(invitation: &ExchangePacket, local_ssrc: u32, local_name: &str) -> ExchangePacket {
        ExchangePacket {
            command: ControlCommand::InvitationAccepted,
            protocol_version: PROTOCOL_VERSION,
            initiator_token: invitation.initiator_token,
            ssrc: local_ssrc,
            name: Some(local_name.to_string()),
        }
    }

    pub fn end(initiator_token: u32, local_ssrc: u32) -> ExchangePacket {
        ExchangePacket {
            command: ControlCommand::End,
            protocol_version: PROTOCOL_VERSION,
            initiator_token,
            ssrc: local_ssrc,
            name: None,
        }
    }
}

/// Clock synchronization (`CK`). Timestamps are 64 bit session clock ticks; `count` says how
///  many of them are valid (0: initiator's, 1: responder's reply, 2: initiator's final).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SyncPacket {
    pub ssrc: u32,
    pub count: u8,
    pub timestamps: [u64; 3],
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ControlMessage {
    Exchange(ExchangePacket),
    Synchronization(SyncPacket),
    /// `RS`: the highest sequence number the sender has received from us
    ReceiverFeedback { ssrc: u32, sequence_number: u16 },
    /// `RL`
    BitrateLimit { ssrc: u32, limit: u32 },
}

impl Display for ControlMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMessage::Exchange(p) => write!(f, "{:?} SSRC={:#x} token={:#x} name={:?}", p.command, p.ssrc, p.initiator_token, p.name),
            ControlMessage::Synchronization(p) => write!(f, "CK SSRC={:#x} count={} {:?}", p.ssrc, p.count, p.timestamps),
            ControlMessage::ReceiverFeedback { ssrc, sequence_number } => write!(f, "RS SSRC={:#x} sn={}", ssrc, sequence_number),
            ControlMessage::BitrateLimit { ssrc, limit } => write!(f, "RL SSRC={:#x} limit={}", ssrc, limit),
        }
    }
}

impl ControlMessage {
    pub fn command(&self) -> ControlCommand {
        match self {
            ControlMessage::Exchange(p) => p.command,
            ControlMessage::Synchronization(_) => ControlCommand::Synchronization,
            ControlMessage::ReceiverFeedback { .. } => ControlCommand::ReceiverFeedback,
            ControlMessage::BitrateLimit { .. } => ControlCommand::BitrateLimit,
        }
    }

    pub fn kind(&self) -> ControlKind {
        match self.command() {
            ControlCommand::Invitation => ControlKind::Invitation,
            ControlCommand::End => ControlKind::End,
            _ => ControlKind::Other,
        }
    }

    /// The sender's SSRC
    pub fn ssrc(&self) -> u32 {
        match self {
            ControlMessage::Exchange(p) => p.ssrc,
            ControlMessage::Synchronization(p) => p.ssrc,
            ControlMessage::ReceiverFeedback { ssrc, .. } => *ssrc,
            ControlMessage::BitrateLimit { ssrc, .. } => *ssrc,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ControlMessage::Exchange(p) => p.name.as_deref(),
            _ => None,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u16(CONTROL_MARKER);
        buf.put_u16(self.command().into());

        match self {
            ControlMessage::Exchange(p) => {
                buf.put_u32(p.protocol_version);
                buf.put_u32(p.initiator_token);
                buf.put_u32(p.ssrc);
                if let Some(name) = &p.name {
                    buf.put_slice(name.as_bytes());
                    buf.put_u8(0);
                }
            }
            ControlMessage::Synchronization(p) => {
                buf.put_u32(p.ssrc);
                buf.put_u8(p.count);
                buf.put_bytes(0, 3);
                for ts in p.timestamps {
                    buf.put_u64(ts);
                }
            }
            ControlMessage::ReceiverFeedback { ssrc, sequence_number } => {
                buf.put_u32(*ssrc);
                buf.put_u16(*sequence_number);
                buf.put_u16(0);
            }
            ControlMessage::BitrateLimit { ssrc, limit } => {
                buf.put_u32(*ssrc);
                buf.put_u32(*limit);
            }
        }
    }

    pub fn deser(mut buf: &[u8]) -> anyhow::Result<ControlMessage> {
        let marker = buf.try_get_u16()?;
        if marker != CONTROL_MARKER {
            bail!("not a control packet: marker {:#06x}", marker);
        }

        let raw_command = buf.try_get_u16()?;
        let command = ControlCommand::try_from_primitive(raw_command)
            .map_err(|_| anyhow!("unknown control command {:#06x}", raw_command))?;

        let msg = match command {
            ControlCommand::Invitation | ControlCommand::InvitationAccepted | ControlCommand::InvitationRejected | ControlCommand::End => {
                let protocol_version = buf.try_get_u32()?;
                let initiator_token = buf.try_get_u32()?;
                let ssrc = buf.try_get_u32()?;
                ControlMessage::Exchange(ExchangePacket {
                    command,
                    protocol_version,
                    initiator_token,
                    ssrc,
                    name: deser_name(buf),
                })
            }
            ControlCommand::Synchronization => {
                let ssrc = buf.try_get_u32()?;
                let count = buf.try_get_u8()?;
                let _padding = buf.try_get_uint(3)?;
                let timestamps = [buf.try_get_u64()?, buf.try_get_u64()?, buf.try_get_u64()?];
                ControlMessage::Synchronization(SyncPacket { ssrc, count, timestamps })
            }
            ControlCommand::ReceiverFeedback => {
                let ssrc = buf.try_get_u32()?;
                let sequence_number = buf.try_get_u16()?;
                ControlMessage::ReceiverFeedback { ssrc, sequence_number }
            }
            ControlCommand::BitrateLimit => {
                let ssrc = buf.try_get_u32()?;
                let limit = buf.try_get_u32()?;
                ControlMessage::BitrateLimit { ssrc, limit }
            }
        };
        Ok(msg)
    }
}

/// Everything up to the first NUL, or to the end of the packet if there is none
fn deser_name(buf: &[u8]) -> Option<String> {
    let raw = match buf.iter().position(|&b| b == 0) {
        Some(end) => &buf[..end],
        None => buf,
    };
    if raw.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(raw).into_owned())
}

pub fn is_control_datagram(buf: &[u8]) -> bool {
    buf.len() >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == CONTROL_MARKER
}

pub fn decode_control(buf: &[u8]) -> anyhow::Result<ControlMessage> {
    ControlMessage::deser(buf)
}
