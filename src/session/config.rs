use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The name sent to remote peers when accepting their invitations
    pub local_name: String,

    /// The name the session is advertised under. Advertising itself is not done by this crate.
    pub bonjour_name: String,

    /// The address both sockets are bound to
    pub bind_ip: IpAddr,

    /// The control port. The data port is always the next higher port number.
    pub port: u16,

    /// Datagrams longer than this are truncated on receipt
    pub recv_buffer_size: usize,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, port: u16) -> SessionConfig {
        let name = name.into();
        SessionConfig {
            bonjour_name: name.clone(),
            local_name: name,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            recv_buffer_size: 1500,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            bail!("control port must be set explicitly - port 0 is not supported");
        }
        if self.port == u16::MAX {
            bail!("control port {} leaves no room for the data port", self.port);
        }
        if self.recv_buffer_size < 64 {
            bail!("receive buffer size {} is too small", self.recv_buffer_size);
        }
        Ok(())
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port.wrapping_add(1))
    }
}
