//! Discovery transport
//!
//! The broadcaster opens a fresh channel per send so one broken socket never
//! poisons later ticks. [`UdpChannelFactory`] sends JSON datagrams to a
//! multicast group (or a single unicast peer).

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use super::message::DiscoveryMessage;
use crate::error::{Error, Result};

/// Outbound discovery channel
#[async_trait]
pub trait DiscoveryChannel: Send + Sync {
    async fn send(&self, message: &DiscoveryMessage) -> Result<()>;
}

/// Opens discovery channels
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn DiscoveryChannel>>;
}

/// UDP datagram channel to one target address
pub struct UdpChannel {
    socket: UdpSocket,
    target: SocketAddr,
}

#[async_trait]
impl DiscoveryChannel for UdpChannel {
    async fn send(&self, message: &DiscoveryMessage) -> Result<()> {
        let datagram = message.encode()?;
        self.socket.send_to(&datagram, self.target).await?;
        debug!(target = %self.target, kind = %message.kind, bytes = datagram.len(), "Discovery datagram sent");
        Ok(())
    }
}

/// Factory for [`UdpChannel`]s aimed at the discovery address
#[derive(Debug, Clone)]
pub struct UdpChannelFactory {
    address: String,
    port: u16,
}

impl UdpChannelFactory {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.address.as_str(), self.port))
            .await
            .map_err(|e| Error::Config(format!("bad discovery address {}:{}: {e}", self.address, self.port)))?;
        addrs
            .next()
            .ok_or_else(|| Error::Config(format!("discovery address {} did not resolve", self.address)))
    }
}

#[async_trait]
impl ChannelFactory for UdpChannelFactory {
    async fn open(&self) -> Result<Box<dyn DiscoveryChannel>> {
        let target = self.resolve().await?;
        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        if target.ip().is_multicast() && target.is_ipv4() {
            socket.set_multicast_ttl_v4(1)?;
        }
        Ok(Box::new(UdpChannel { socket, target }))
    }
}

/// Bind the socket a receiver listens on, joining the group when multicast
pub async fn bind_discovery_socket(address: &str, port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    match address.parse::<Ipv4Addr>() {
        Ok(group) if group.is_multicast() => {
            socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        }
        Ok(_) => {}
        Err(e) => {
            return Err(Error::Config(format!("bad discovery address {address}: {e}")));
        }
    }
    Ok(socket)
}
