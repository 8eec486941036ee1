use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, info, span, trace, warn, Instrument, Level};

use crate::control::{self, ControlKind, ControlMessage};
use crate::rtp;
use crate::session::connection::{Channel, Connection};
use crate::session::registry::LoadOrCreate;
use crate::session::session::SessionShared;
use crate::session::transport::DatagramHandler;

/// Routes the datagrams of one of the session's ports. Both ports accept control packets, told
///  apart from RTP-MIDI data by the control marker. RTP-MIDI data is only accepted on the data port.
pub(crate) struct SessionDispatcher {
    shared: Arc<SessionShared>,
    channel: Channel,
}

impl SessionDispatcher {
    pub(crate) fn new(shared: Arc<SessionShared>, channel: Channel) -> SessionDispatcher {
        SessionDispatcher { shared, channel }
    }

    async fn on_control(&self, buf: &[u8], from: SocketAddr) {
        let msg = match control::decode_control(buf) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping malformed control packet from {}: {}", from, e);
                trace!("malformed packet: {:02x?}", buf);
                return;
            }
        };
        debug!("received {}", msg);

        match msg.kind() {
            ControlKind::Invitation => self.on_invitation(&msg, from).await,
            ControlKind::End => {
                match self.shared.registry.remove(msg.ssrc()) {
                    Some(connection) => connection.handle_control(&msg, self.channel, from).await,
                    None => warn!("end of session for SSRC {:#x} which is not registered - ignoring", msg.ssrc()),
                }
            }
            ControlKind::Other => {
                match self.shared.registry.load(msg.ssrc()) {
                    Some(connection) => connection.handle_control(&msg, self.channel, from).await,
                    None => warn!("{:?} from {} for SSRC {:#x} which is not registered - ignoring", msg.command(), from, msg.ssrc()),
                }
            }
        }
    }

    async fn on_invitation(&self, msg: &ControlMessage, from: SocketAddr) {
        let ssrc = msg.ssrc();
        let connection = match self.shared.registry.load_or_create(ssrc, || {
            Connection::new(ssrc, msg.name().map(|s| s.to_string()), Arc::downgrade(&self.shared))
        }) {
            LoadOrCreate::Created(connection) => {
                info!("new connection from {}: SSRC {:#x}, name {:?}", from, ssrc, msg.name());
                connection
            }
            LoadOrCreate::Loaded(connection) => {
                info!("invitation on {:?} port for existing connection {:?}", self.channel, connection);
                connection
            }
            LoadOrCreate::Closed => {
                warn!("session is shutting down - ignoring invitation from {}", from);
                return;
            }
        };
        connection.handle_control(msg, self.channel, from).await;
    }

    async fn on_data(&self, buf: &[u8], from: SocketAddr) {
        let message = match rtp::decode(buf) {
            Ok(message) => message,
            Err(e) => {
                warn!("malformed RTP-MIDI packet from {}: {}", from, e);
                trace!("malformed packet: {:02x?}", buf);
                match e.into_partial() {
                    Some(partial) if !partial.commands.is_empty() => partial,
                    _ => return,
                }
            }
        };
        trace!("received {}", message);

        match self.shared.registry.load(message.ssrc) {
            Some(connection) => connection.handle_rtp(message).await,
            None => debug!("{} from {} has no registered connection - dropping", message, from),
        }
    }
}

#[async_trait]
impl DatagramHandler for SessionDispatcher {
    async fn handle_datagram(&self, buf: &[u8], from: SocketAddr) {
        let span = span!(Level::TRACE, "datagram", channel = ?self.channel, %from);
        async {
            if control::is_control_datagram(buf) {
                self.on_control(buf, from).await;
            }
            else if self.channel == Channel::Data {
                self.on_data(buf, from).await;
            }
            else {
                debug!("RTP-MIDI data on the control port from {} - dropping", from);
            }
        }
        .instrument(span)
        .await
    }
}
