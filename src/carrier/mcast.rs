use anyhow::{bail, Context};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::net::framing::{read_framed_int, write_framed_int};
use crate::net::DgramTwoWay;
use crate::protocol::connection_state::ConnectionState;

use super::carrier::Carrier;
use super::specifier::{self, SpecifierCode, HEADER_LEN};

/// Multicast carrier: connectionless and broadcast. The initiator announces the group in
///  its extra header, the acceptor joins it, and both shift onto datagram sockets - the
///  receiver listening on the group, the sender targeting it. Several local outputs
///  sharing one group elect a single sender (see `Election`), so one group sees one
///  packet per message no matter how many logical connections exist.
#[derive(Clone)]
pub struct McastCarrier {
    group: SocketAddr,
    socket: Option<Arc<UdpSocket>>,
}

impl McastCarrier {
    pub const DEFAULT_GROUP: &'static str = "239.255.76.67:17511";

    pub fn new() -> McastCarrier {
        McastCarrier {
            group: Self::DEFAULT_GROUP.parse().expect("literal addr"),
            socket: None,
        }
    }

    /// A prototype bound to a non-default group; register it under its own name upstream
    ///  if several groups need to coexist.
    pub fn with_group(group: SocketAddr) -> McastCarrier {
        McastCarrier { group, socket: None }
    }
}

impl Default for McastCarrier {
    fn default() -> McastCarrier {
        McastCarrier::new()
    }
}

#[async_trait]
impl Carrier for McastCarrier {
    fn name(&self) -> &str {
        "mcast"
    }

    fn fresh(&self) -> Box<dyn Carrier> {
        Box::new(McastCarrier { group: self.group, socket: None })
    }

    fn check_header(&self, header: &[u8; HEADER_LEN]) -> bool {
        specifier::matches(header, SpecifierCode::Mcast, false)
    }

    fn write_header(&self, header: &mut [u8; HEADER_LEN]) {
        *header = specifier::encode_header(SpecifierCode::Mcast, false);
    }

    fn is_connectionless(&self) -> bool {
        true
    }

    fn is_broadcast(&self) -> bool {
        true
    }

    fn broadcast_group(&self) -> Option<String> {
        Some(self.group.to_string())
    }

    async fn send_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.write_header(&mut header);
        proto.default_send_header(header).await?;

        // announce the group, then prepare our sending socket
        let group = self.group.to_string();
        proto.stream().write_all(&(group.len() as u32).to_le_bytes()).await?;
        proto.stream().write_all(group.as_bytes()).await?;
        proto.stream().flush().await?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_loop_v4(true)?;
        self.socket = Some(Arc::new(socket));
        Ok(())
    }

    async fn expect_reply_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        read_framed_int(proto.stream()).await.context("group join confirmation")?;
        let socket = self.socket.take().context("datagram socket not bound")?;
        debug!("shifting connection to multicast group {:?} as sender", self.group);
        proto.shift_stream(Box::new(DgramTwoWay::new(socket, Some(self.group))));
        Ok(())
    }

    async fn expect_extra_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let mut len_bytes = [0u8; 4];
        proto.stream().read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > 256 {
            bail!("group address of {} bytes is not plausible", len);
        }
        let mut bytes = vec![0u8; len];
        proto.stream().read_exact(&mut bytes).await?;
        let group: SocketAddr = String::from_utf8_lossy(&bytes)
            .parse()
            .context("peer announced an unparsable group address")?;
        self.group = group;
        Ok(())
    }

    async fn respond_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let group_ip = match self.group.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => bail!("only IPv4 multicast groups are supported"),
        };

        let socket = UdpSocket::bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.group.port())).await?;
        socket.join_multicast_v4(group_ip, Ipv4Addr::UNSPECIFIED)?;
        debug!("joined multicast group {:?}", self.group);

        write_framed_int(proto.stream(), 0).await?;
        proto.stream().flush().await?;

        proto.shift_stream(Box::new(DgramTwoWay::new(Arc::new(socket), None)));
        Ok(())
    }
}
