//! Helpers for tests that talk to a session through real sockets on the loopback interface

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use anyhow::{anyhow, bail};
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::control::{ControlCommand, ControlMessage, ExchangePacket, PROTOCOL_VERSION};
use crate::rtp::{self, MidiMessage, RtpMidiHeader};
use crate::session::{Channel, Session, SessionConfig};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A port P on localhost such that both P and P+1 were free a moment ago
pub fn free_port_pair() -> anyhow::Result<u16> {
    for _ in 0..100 {
        let first = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = first.local_addr()?.port();
        if port == u16::MAX {
            continue;
        }
        if std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, port + 1)).is_ok() {
            return Ok(port);
        }
    }
    bail!("no free pair of consecutive ports")
}

/// Starts a session bound to localhost on a free port pair
pub async fn start_local_session(name: &str) -> anyhow::Result<Session> {
    let mut last_err = anyhow!("no attempt to start a session");
    for _ in 0..10 {
        let config = SessionConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            ..SessionConfig::new(name, free_port_pair()?)
        };
        match Session::start_with_config(config).await {
            Ok(session) => return Ok(session),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// An RTP-MIDI datagram with the given raw MIDI list (including the list header)
pub fn rtp_packet(sequence_number: u16, ssrc: u32, list: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    RtpMidiHeader::new(sequence_number, 0, ssrc).ser(&mut buf);
    let mut result = buf.to_vec();
    result.extend_from_slice(list);
    result
}

/// The remote side of a connection: a pair of sockets playing the session initiator
pub struct FakePeer {
    pub ssrc: u32,
    pub name: String,
    pub initiator_token: u32,
    control: UdpSocket,
    data: UdpSocket,
}

impl FakePeer {
    pub async fn bind(ssrc: u32, name: &str) -> anyhow::Result<FakePeer> {
        Ok(FakePeer {
            ssrc,
            name: name.to_string(),
            initiator_token: ssrc.rotate_left(16) ^ 0x5a5a_5a5a,
            control: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?,
            data: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?,
        })
    }

    pub fn control_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.control.local_addr()?)
    }

    pub fn data_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.data.local_addr()?)
    }

    fn socket(&self, channel: Channel) -> &UdpSocket {
        match channel {
            Channel::Control => &self.control,
            Channel::Data => &self.data,
        }
    }

    fn exchange(&self, command: ControlCommand) -> ControlMessage {
        ControlMessage::Exchange(ExchangePacket {
            command,
            protocol_version: PROTOCOL_VERSION,
            initiator_token: self.initiator_token,
            ssrc: self.ssrc,
            name: Some(self.name.clone()),
        })
    }

    pub fn invitation(&self) -> ControlMessage {
        self.exchange(ControlCommand::Invitation)
    }

    pub fn end(&self) -> ControlMessage {
        self.exchange(ControlCommand::End)
    }

    /// Invites the session on both ports, waiting for each invitation to be accepted
    pub async fn invite(&self, session_port: u16) -> anyhow::Result<()> {
        for channel in [Channel::Control, Channel::Data] {
            self.send_control(session_port, channel, &self.invitation()).await?;
            match self.recv_control(channel).await? {
                ControlMessage::Exchange(p) if p.command == ControlCommand::InvitationAccepted => {}
                other => bail!("invitation on {:?} port was not accepted: {}", channel, other),
            }
        }
        Ok(())
    }

    pub async fn send_control(&self, session_port: u16, channel: Channel, msg: &ControlMessage) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        self.socket(channel).send_to(&buf, session_addr(session_port, channel)).await?;
        Ok(())
    }

    pub async fn recv_control(&self, channel: Channel) -> anyhow::Result<ControlMessage> {
        let buf = recv(self.socket(channel)).await?;
        ControlMessage::deser(&buf)
    }

    pub async fn send_data(&self, session_port: u16, datagram: &[u8]) -> anyhow::Result<()> {
        self.data.send_to(datagram, session_addr(session_port, Channel::Data)).await?;
        Ok(())
    }

    /// Sends an arbitrary datagram to one of the session's ports
    pub async fn send_raw(&self, session_port: u16, channel: Channel, datagram: &[u8]) -> anyhow::Result<()> {
        self.socket(channel).send_to(datagram, session_addr(session_port, channel)).await?;
        Ok(())
    }

    pub async fn recv_data(&self) -> anyhow::Result<MidiMessage> {
        let buf = recv(&self.data).await?;
        Ok(rtp::decode(&buf)?)
    }
}

fn session_addr(session_port: u16, channel: Channel) -> SocketAddr {
    let port = match channel {
        Channel::Control => session_port,
        Channel::Data => session_port + 1,
    };
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

async fn recv(socket: &UdpSocket) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; 2048];
    let (len, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await??;
    buf.truncate(len);
    Ok(buf)
}
