use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{error, info, trace};

/// Called for every datagram a receive loop reads. Implementations handle their own errors:
///  there is nothing the loop could do with them.
#[async_trait]
pub trait DatagramHandler: Send + Sync {
    async fn handle_datagram(&self, buf: &[u8], from: SocketAddr);
}

/// Reads datagrams from `socket` until the surrounding task is aborted. Read errors are logged
///  and do not terminate the loop.
pub async fn recv_loop(socket: Arc<UdpSocket>, buffer_size: usize, handler: Arc<dyn DatagramHandler>) {
    info!("starting receive loop on {:?}", socket.local_addr());

    let mut buf = vec![0u8; buffer_size];
    loop {
        let (num_read, from) = match socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };

        trace!("received datagram from {:?}: {:02x?}", from, &buf[..num_read]);
        handler.handle_datagram(&buf[..num_read], from).await;
    }
}
