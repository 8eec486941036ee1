use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use anyhow::anyhow;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::control::{ControlCommand, ControlMessage, ExchangePacket, SyncPacket};
use crate::rtp::{self, MidiMessage};
use crate::session::session::SessionShared;
use crate::timestamp;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    /// invited on the control port
    Initial,
    /// invited on the data port as well
    Established,
    Ended,
}

/// The port a datagram arrived on
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Channel {
    Control,
    Data,
}

#[derive(Debug)]
struct StreamState {
    lifecycle: ConnectionState,
    initiator_token: u32,
    control_addr: Option<SocketAddr>,
    data_addr: Option<SocketAddr>,
    last_sequence_number: Option<u16>,
    latency: Option<Duration>,
}

/// A remote peer that invited this session, identified by its SSRC
pub struct Connection {
    remote_ssrc: u32,
    remote_name: Option<String>,
    session: Weak<SessionShared>,
    state: RwLock<StreamState>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection{{SSRC={:#x} name={:?}}}", self.remote_ssrc, self.remote_name)
    }
}

impl Connection {
    pub(crate) fn new(remote_ssrc: u32, remote_name: Option<String>, session: Weak<SessionShared>) -> Connection {
        Connection {
            remote_ssrc,
            remote_name,
            session,
            state: RwLock::new(StreamState {
                lifecycle: ConnectionState::Initial,
                initiator_token: 0,
                control_addr: None,
                data_addr: None,
                last_sequence_number: None,
                latency: None,
            }),
        }
    }

    pub fn remote_ssrc(&self) -> u32 {
        self.remote_ssrc
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.lifecycle
    }

    pub async fn control_addr(&self) -> Option<SocketAddr> {
        self.state.read().await.control_addr
    }

    pub async fn data_addr(&self) -> Option<SocketAddr> {
        self.state.read().await.data_addr
    }

    /// The sequence number of the most recent message received from the remote peer
    pub async fn last_sequence_number(&self) -> Option<u16> {
        self.state.read().await.last_sequence_number
    }

    /// One-way latency as measured by the most recent completed clock synchronization
    pub async fn latency(&self) -> Option<Duration> {
        self.state.read().await.latency
    }

    fn session(&self) -> anyhow::Result<Arc<SessionShared>> {
        self.session.upgrade()
            .ok_or_else(|| anyhow!("session was shut down"))
    }

    pub(crate) async fn handle_control(&self, msg: &ControlMessage, channel: Channel, from: SocketAddr) {
        if let Err(e) = self._handle_control(msg, channel, from).await {
            warn!("error handling control message {} for connection {:?}: {}", msg, self, e);
        }
    }

    async fn _handle_control(&self, msg: &ControlMessage, channel: Channel, from: SocketAddr) -> anyhow::Result<()> {
        match msg {
            ControlMessage::Exchange(packet) => match packet.command {
                ControlCommand::Invitation => self.on_invitation(packet, channel, from).await,
                ControlCommand::End => {
                    self.state.write().await.lifecycle = ConnectionState::Ended;
                    info!("remote peer ended connection {:?}", self);
                    Ok(())
                }
                _ => {
                    debug!("ignoring {} from {}", msg, from);
                    Ok(())
                }
            },
            ControlMessage::Synchronization(sync) => self.on_sync(sync, channel, from).await,
            ControlMessage::ReceiverFeedback { sequence_number, .. } => {
                debug!("{:?} acknowledged messages up to #{}", self, sequence_number);
                Ok(())
            }
            ControlMessage::BitrateLimit { limit, .. } => {
                debug!("{:?} requested bitrate limit {}", self, limit);
                Ok(())
            }
        }
    }

    async fn on_invitation(&self, invitation: &ExchangePacket, channel: Channel, from: SocketAddr) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.initiator_token = invitation.initiator_token;
            match channel {
                Channel::Control => state.control_addr = Some(from),
                Channel::Data => {
                    state.data_addr = Some(from);
                    if state.lifecycle == ConnectionState::Initial {
                        state.lifecycle = ConnectionState::Established;
                        info!("connection {:?} established, data address {}", self, from);
                    }
                }
            }
        }

        let session = self.session()?;
        let reply = ControlMessage::Exchange(ExchangePacket::accept(invitation, session.ssrc, &session.local_name));
        session.send_control(&reply, channel, from).await
    }

    async fn on_sync(&self, sync: &SyncPacket, channel: Channel, from: SocketAddr) -> anyhow::Result<()> {
        match sync.count {
            0 => {
                let session = self.session()?;
                let reply = ControlMessage::Synchronization(SyncPacket {
                    ssrc: session.ssrc,
                    count: 1,
                    timestamps: [
                        sync.timestamps[0],
                        timestamp::sync_ticks(Instant::now(), session.start_time),
                        0,
                    ],
                });
                trace!("clock sync with {:?}: replying {}", self, reply);
                session.send_control(&reply, channel, from).await
            }
            2 => {
                // both timestamps are in the remote peer's clock
                let round_trip_ticks = sync.timestamps[2].saturating_sub(sync.timestamps[0]);
                let latency = ticks_to_duration(round_trip_ticks / 2);
                debug!("clock sync with {:?} complete, latency {:?}", self, latency);
                self.state.write().await.latency = Some(latency);
                Ok(())
            }
            count => {
                trace!("ignoring clock sync with count {} from {}", count, from);
                Ok(())
            }
        }
    }

    pub(crate) async fn handle_rtp(&self, message: MidiMessage) {
        {
            let mut state = self.state.write().await;
            if let Some(prev) = state.last_sequence_number {
                let expected = prev.wrapping_add(1);
                if message.sequence_number != expected {
                    debug!("sequence gap from {:?}: expected #{}, received #{}", self, expected, message.sequence_number);
                }
            }
            state.last_sequence_number = Some(message.sequence_number);
        }

        match self.session() {
            Ok(session) => session.deliver(message),
            Err(_) => debug!("dropping {} - session was shut down", message),
        }
    }

    /// Encodes a message and sends it to the peer's data port
    pub async fn send_message(&self, message: &MidiMessage) -> anyhow::Result<()> {
        let data_addr = self.data_addr().await
            .ok_or_else(|| anyhow!("no data address for {:?} yet", self))?;
        let session = self.session()?;

        let buf = rtp::encode(message, session.start_time)?;
        trace!("sending {} to {}", message, data_addr);
        session.data_socket.send_to(&buf, data_addr).await?;
        Ok(())
    }

    /// Ends the connection locally, notifying the remote peer if its control address is known.
    ///  Notification is best effort.
    pub async fn end(&self) {
        let (control_addr, initiator_token) = {
            let mut state = self.state.write().await;
            if state.lifecycle == ConnectionState::Ended {
                return;
            }
            state.lifecycle = ConnectionState::Ended;
            (state.control_addr, state.initiator_token)
        };
        info!("ending connection {:?}", self);

        let Some(control_addr) = control_addr else {
            return;
        };
        let Ok(session) = self.session() else {
            return;
        };

        let msg = ControlMessage::Exchange(ExchangePacket::end(initiator_token, session.ssrc));
        if let Err(e) = session.send_control(&msg, Channel::Control, control_addr).await {
            warn!("error notifying {:?} of connection end: {}", self, e);
        }
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_micros(ticks.saturating_mul(1_000_000 / timestamp::TICKS_PER_SECOND))
}
