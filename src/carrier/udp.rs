use anyhow::Context;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::net::framing::{read_framed_int, write_framed_int};
use crate::net::DgramTwoWay;
use crate::protocol::connection_state::ConnectionState;

use super::carrier::Carrier;
use super::specifier::{self, SpecifierCode, HEADER_LEN};

/// Connectionless point-to-point carrier. Negotiation still runs over the accepting
///  port's stream socket; each side announces a freshly bound datagram endpoint and the
///  connection then shifts off the negotiation stream onto the datagram pair. No acks,
///  no replies - each flush is one datagram carrying one framed message.
pub struct UdpCarrier {
    socket: Option<Arc<UdpSocket>>,
    peer_dgram_port: Option<u16>,
}

impl UdpCarrier {
    pub fn new() -> UdpCarrier {
        UdpCarrier { socket: None, peer_dgram_port: None }
    }
}

impl Default for UdpCarrier {
    fn default() -> UdpCarrier {
        UdpCarrier::new()
    }
}

#[async_trait]
impl Carrier for UdpCarrier {
    fn name(&self) -> &str {
        "udp"
    }

    fn fresh(&self) -> Box<dyn Carrier> {
        Box::new(UdpCarrier::new())
    }

    fn check_header(&self, header: &[u8; HEADER_LEN]) -> bool {
        specifier::matches(header, SpecifierCode::Udp, false)
    }

    fn write_header(&self, header: &mut [u8; HEADER_LEN]) {
        *header = specifier::encode_header(SpecifierCode::Udp, false);
    }

    fn is_connectionless(&self) -> bool {
        true
    }

    async fn send_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.write_header(&mut header);
        proto.default_send_header(header).await?;

        let socket = Arc::new(UdpSocket::bind((proto.local_addr().ip(), 0)).await?);
        let port = socket.local_addr()?.port();
        debug!("announcing datagram endpoint on port {}", port);
        self.socket = Some(socket);
        write_framed_int(proto.stream(), port as i32).await?;
        proto.stream().flush().await
    }

    async fn expect_reply_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let port = read_framed_int(proto.stream()).await?;
        let port = u16::try_from(port).context("peer datagram port out of range")?;
        let peer = SocketAddr::new(proto.peer_addr().ip(), port);
        let socket = self.socket.take().context("datagram socket not bound")?;
        debug!("shifting connection to datagram pair with {:?}", peer);
        proto.shift_stream(Box::new(DgramTwoWay::new(socket, Some(peer))));
        Ok(())
    }

    async fn expect_extra_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let port = read_framed_int(proto.stream()).await?;
        self.peer_dgram_port = Some(u16::try_from(port).context("peer datagram port out of range")?);
        Ok(())
    }

    async fn respond_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let peer_port = self.peer_dgram_port.context("peer did not announce a datagram endpoint")?;

        let socket = Arc::new(UdpSocket::bind((proto.local_addr().ip(), 0)).await?);
        let port = socket.local_addr()?.port();
        write_framed_int(proto.stream(), port as i32).await?;
        proto.stream().flush().await?;

        let peer = SocketAddr::new(proto.peer_addr().ip(), peer_port);
        debug!("shifting connection to datagram pair with {:?}", peer);
        proto.shift_stream(Box::new(DgramTwoWay::new(socket, Some(peer))));
        Ok(())
    }
}
