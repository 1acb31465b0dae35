//! UDP relay for UDP ASSOCIATE
//!
//! Binds one UDP socket for the life of an association. The first datagram
//! seen from the client's IP fixes the client endpoint. Datagrams from that
//! endpoint are unwrapped and sent to the address in their SOCKS header;
//! datagrams from anyone else are wrapped with their source address and sent
//! back to the client endpoint.

use super::{encode_udp_packet, parse_udp_packet, UdpPacket};
use crate::helper::CloseSignal;
use crate::socks::consts::MAX_UDP_PACKET;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct RelayState {
    running: AtomicBool,
    stop: CloseSignal,
    done: CloseSignal,
}

/// A running (or not yet started) UDP ASSOCIATE relay
#[derive(Debug)]
pub struct UdpRelay {
    bind_ip: IpAddr,
    client_ip: IpAddr,
    local_addr: Option<SocketAddr>,
    state: Arc<RelayState>,
}

impl UdpRelay {
    /// Create a relay that will bind on `bind_ip` and serve the client at
    /// `client_ip`
    pub fn new(bind_ip: IpAddr, client_ip: IpAddr) -> Self {
        UdpRelay {
            bind_ip,
            client_ip,
            local_addr: None,
            state: Arc::new(RelayState::default()),
        }
    }

    /// Bind an ephemeral port and start the receive loop
    ///
    /// Returns the bound address to advertise in the ASSOCIATE reply.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.local_addr.is_some() {
            bail!("UDP relay already started");
        }

        let socket = UdpSocket::bind(SocketAddr::new(self.bind_ip, 0))
            .await
            .with_context(|| format!("Failed to bind UDP relay on {}", self.bind_ip))?;
        let local_addr = socket.local_addr()?;
        self.local_addr = Some(local_addr);

        self.state.running.store(true, Ordering::Release);
        debug!("UDP relay listening on {} for {}", local_addr, self.client_ip);

        tokio::spawn(relay_loop(socket, self.client_ip, self.state.clone()));

        Ok(local_addr)
    }

    /// Address the relay is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Close the socket and end the receive loop; idempotent
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        if self.state.stop.trigger() {
            debug!("UDP relay {:?} stop requested", self.local_addr);
        }
    }

    /// Whether the socket is still open
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Wait for the receive loop to end
    ///
    /// Returns immediately for a relay that was never started.
    pub async fn wait(&self) {
        if self.local_addr.is_some() {
            self.state.done.wait().await;
        }
    }
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.state.stop.trigger();
    }
}

async fn relay_loop(socket: UdpSocket, client_ip: IpAddr, state: Arc<RelayState>) {
    let mut buf = vec![0u8; MAX_UDP_PACKET];
    let mut client: Option<SocketAddr> = None;

    loop {
        let (len, from) = tokio::select! {
            _ = state.stop.wait() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP relay receive failed: {}", e);
                    break;
                }
            },
        };

        if client.is_none() && from.ip() == client_ip {
            debug!("UDP relay client endpoint is {}", from);
            client = Some(from);
        }

        match client {
            Some(endpoint) if endpoint == from => {
                forward_to_target(&socket, &buf[..len]).await;
            }
            Some(endpoint) => {
                let packet = UdpPacket::new(from.into(), Bytes::copy_from_slice(&buf[..len]));
                if let Err(e) = socket.send_to(&encode_udp_packet(&packet), endpoint).await {
                    warn!("UDP relay reply to {} failed: {}", endpoint, e);
                } else {
                    trace!("UDP relay {} bytes {} -> {}", len, from, endpoint);
                }
            }
            None => trace!("UDP relay dropped datagram from {} before the client", from),
        }
    }

    state.running.store(false, Ordering::Release);
    debug!("UDP relay closed");
    state.done.trigger();
}

async fn forward_to_target(socket: &UdpSocket, datagram: &[u8]) {
    let packet = match parse_udp_packet(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Invalid SOCKS5 UDP packet: {}", e);
            return;
        }
    };

    if packet.is_fragmented() {
        debug!("Fragmented UDP packet dropped");
        return;
    }

    let target = match packet.addr.resolve().await {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Failed to resolve UDP target {}: {}", packet.addr, e);
            return;
        }
    };

    match socket.send_to(&packet.data, target).await {
        Ok(n) => trace!("UDP relay {} bytes -> {}", n, target),
        Err(e) => warn!("UDP send to {} failed: {}", target, e),
    }
}
