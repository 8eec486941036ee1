use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;
use anyhow::Context;
use arc_swap::ArcSwapOption;
use bytes::{Bytes, BytesMut};
use rand::{Rng, RngCore};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::control::ControlMessage;
use crate::rtp::midi_list;
use crate::rtp::{MidiCommand, MidiCommands, MidiMessage};
use crate::session::config::SessionConfig;
use crate::session::connection::{Channel, Connection};
use crate::session::dispatch::SessionDispatcher;
use crate::session::registry::Registry;
use crate::session::transport::recv_loop;

/// Receives the messages of all connections of a session. Calls are serialized: they all come
///  from the session's data port receive loop.
#[cfg_attr(test, mockall::automock)]
pub trait MidiMessageHandler: Send + Sync {
    fn handle_midi(&self, message: MidiMessage);
}

impl<F: Fn(MidiMessage) + Send + Sync> MidiMessageHandler for F {
    fn handle_midi(&self, message: MidiMessage) {
        self(message)
    }
}

/// State shared between the session handle, its receive loops and its connections
pub(crate) struct SessionShared {
    pub(crate) local_name: String,
    pub(crate) bonjour_name: String,
    pub(crate) port: u16,
    pub(crate) ssrc: u32,
    pub(crate) start_time: Instant,
    sequence_number: AtomicU16,
    pub(crate) control_socket: Arc<UdpSocket>,
    pub(crate) data_socket: Arc<UdpSocket>,
    pub(crate) registry: Registry<Connection>,
    handler: ArcSwapOption<Box<dyn MidiMessageHandler>>,
}

impl SessionShared {
    pub(crate) fn socket(&self, channel: Channel) -> &UdpSocket {
        match channel {
            Channel::Control => self.control_socket.as_ref(),
            Channel::Data => self.data_socket.as_ref(),
        }
    }

    pub(crate) async fn send_control(&self, msg: &ControlMessage, channel: Channel, to: SocketAddr) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        self.socket(channel).send_to(&buf, to).await?;
        Ok(())
    }

    pub(crate) fn deliver(&self, message: MidiMessage) {
        match self.handler.load_full() {
            Some(handler) => handler.handle_midi(message),
            None => debug!("no handler registered - dropping {}", message),
        }
    }

    fn next_sequence_number(&self) -> u16 {
        self.sequence_number.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

/// An RTP-MIDI session listening on a pair of consecutive UDP ports: control on the configured
///  port, data on the next one. Remote peers join by inviting the session; every message sent
///  through the session goes to all joined peers.
///
/// Dropping the session stops its receive loops without notifying peers, [Session::end] is the
///  orderly way to shut down.
pub struct Session {
    shared: Arc<SessionShared>,
    control_task: JoinHandle<()>,
    data_task: JoinHandle<()>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session{{{:?} SSRC={:#x} port={}}}", self.shared.local_name, self.shared.ssrc, self.shared.port)
    }
}

impl Session {
    pub async fn start(name: &str, port: u16) -> anyhow::Result<Session> {
        Session::start_with_config(SessionConfig::new(name, port)).await
    }

    pub async fn start_with_config(config: SessionConfig) -> anyhow::Result<Session> {
        config.validate()?;

        let control_socket = UdpSocket::bind(config.control_addr()).await
            .with_context(|| format!("binding control socket to {}", config.control_addr()))?;
        info!("bound control socket to {:?}", control_socket.local_addr());
        let data_socket = UdpSocket::bind(config.data_addr()).await
            .with_context(|| format!("binding data socket to {}", config.data_addr()))?;
        info!("bound data socket to {:?}", data_socket.local_addr());

        let mut rng = rand::thread_rng();
        let shared = Arc::new(SessionShared {
            local_name: config.local_name,
            bonjour_name: config.bonjour_name,
            port: config.port,
            ssrc: rng.next_u32(),
            start_time: Instant::now(),
            sequence_number: AtomicU16::new(rng.gen()),
            control_socket: Arc::new(control_socket),
            data_socket: Arc::new(data_socket),
            registry: Registry::new(),
            handler: ArcSwapOption::empty(),
        });

        let control_task = tokio::spawn(recv_loop(
            shared.control_socket.clone(),
            config.recv_buffer_size,
            Arc::new(SessionDispatcher::new(shared.clone(), Channel::Control)),
        ));
        let data_task = tokio::spawn(recv_loop(
            shared.data_socket.clone(),
            config.recv_buffer_size,
            Arc::new(SessionDispatcher::new(shared.clone(), Channel::Data)),
        ));

        info!("started session {:?} with SSRC {:#x} on ports {}/{}", shared.local_name, shared.ssrc, shared.port, shared.port as u32 + 1);

        Ok(Session {
            shared,
            control_task,
            data_task,
        })
    }

    /// Registers the handler for all incoming messages, replacing any previously registered one
    pub fn handle(&self, handler: impl MidiMessageHandler + 'static) {
        let handler: Box<dyn MidiMessageHandler> = Box::new(handler);
        self.shared.handler.store(Some(Arc::new(handler)));
    }

    /// Sends a single command to all connections, returning the number of connections it was
    ///  sent to
    pub async fn send_payload(&self, payload: &[u8]) -> anyhow::Result<usize> {
        let commands = MidiCommands::new(vec![MidiCommand::new(Bytes::copy_from_slice(payload))]);
        self.send_commands(commands).await
    }

    /// Sends a command list as one message to all connections, returning the number of
    ///  connections it was sent to. Failing to send to one connection does not affect the others.
    ///
    /// A list that is too long to be encoded is rejected without consuming a sequence number.
    pub async fn send_commands(&self, commands: MidiCommands) -> anyhow::Result<usize> {
        midi_list::check_encodable(&commands, self.shared.start_time)?;

        let message = MidiMessage {
            sequence_number: self.shared.next_sequence_number(),
            ssrc: self.shared.ssrc,
            commands,
        };

        let mut num_sent = 0;
        for connection in self.shared.registry.snapshot() {
            match connection.send_message(&message).await {
                Ok(()) => num_sent += 1,
                Err(e) => warn!("error sending {} to {:?}: {}", message, connection, e),
            }
        }
        Ok(num_sent)
    }

    /// Ends all connections, notifying their peers, and stops receiving. No new connections are
    ///  accepted once this is called.
    pub async fn end(mut self) {
        info!("ending session {:?}", self.shared.local_name);

        for connection in self.shared.registry.close() {
            connection.end().await;
        }

        self.control_task.abort();
        self.data_task.abort();
        join_recv_loop(&mut self.control_task, Channel::Control).await;
        join_recv_loop(&mut self.data_task, Channel::Data).await;
    }

    pub fn ssrc(&self) -> u32 {
        self.shared.ssrc
    }

    pub fn local_name(&self) -> &str {
        &self.shared.local_name
    }

    pub fn bonjour_name(&self) -> &str {
        &self.shared.bonjour_name
    }

    /// The control port
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// The sequence number of the most recently sent message
    pub fn sequence_number(&self) -> u16 {
        self.shared.sequence_number.load(Ordering::Acquire)
    }

    pub fn start_time(&self) -> Instant {
        self.shared.start_time
    }

    pub fn control_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.shared.control_socket.local_addr()?)
    }

    pub fn data_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.shared.data_socket.local_addr()?)
    }

    pub fn connection(&self, ssrc: u32) -> Option<Arc<Connection>> {
        self.shared.registry.load(ssrc)
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.snapshot()
    }
}

async fn join_recv_loop(task: &mut JoinHandle<()>, channel: Channel) {
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            warn!("{:?} port receive loop terminated abnormally: {}", channel, e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.control_task.abort();
        self.data_task.abort();
    }
}
