use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::bottle::Bottle;
use crate::carrier::{Carrier, CarrierRegistry, Inbound, HEADER_LEN};
use crate::net::framing::{read_framed_int, write_framed_int};
use crate::net::TwoWayStream;
use crate::port::{PortConfig, Route};

/// What a confused peer gets before being dropped when its first 8 bytes match no
///  registered carrier.
const REFUSAL: &str = "* Error: protocol not recognized.\r\n\
* The first 8 bytes sent to a port identify the wire protocol you wish to speak,\r\n\
* and the ones you sent match none of the protocols registered here.\r\n\
* If you are a human, try typing \"CONNECT <yourname>\" followed by <RETURN>.\r\n\
* Goodbye.\r\n";

/// Drives a single connection: the handshake choreography and steady-state message
///  exchange, with every protocol-specific decision delegated to the owned [`Carrier`]
///  instance. Insulates ports from the details of the carrier in use.
///
/// The carrier may swap the underlying stream mid-handshake (datagram carriers finish
///  negotiation by shifting off the negotiation socket), which is why the stream lives
///  behind [`shift_stream`](ConnectionState::shift_stream).
pub struct ConnectionState {
    stream: Box<dyn TwoWayStream>,
    carrier: Option<Box<dyn Carrier>>,
    route: Route,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    config: Arc<PortConfig>,
    reply_port: Option<u16>,
}

impl ConnectionState {
    /// Initiating side: pick the carrier named in the route, send our header and drive
    ///  the handshake to completion.
    pub async fn open_initiator(
        registry: &CarrierRegistry,
        route: Route,
        stream: Box<dyn TwoWayStream>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        config: Arc<PortConfig>,
    ) -> anyhow::Result<ConnectionState> {
        let carrier = registry.choose_by_name(&route.carrier)?;
        let mut state = ConnectionState {
            stream,
            carrier: Some(carrier),
            route,
            local_addr,
            peer_addr,
            config,
            reply_port: None,
        };

        let mut carrier = state.take_carrier()?;
        let result = async {
            carrier.send_header(&mut state).await.context("sending handshake header")?;
            carrier
                .expect_reply_to_header(&mut state)
                .await
                .context("waiting for handshake response")
        }
        .await;
        state.carrier = Some(carrier);
        result?;

        debug!("initiated connection {}", state.route);
        Ok(state)
    }

    /// Accepting side: read the peer's 8-byte header, dispatch it through the registry
    ///  (first registered match wins) and let the matched carrier finish the handshake.
    /// An unrecognized header gets the courtesy refusal before the error is returned.
    pub async fn open_acceptor(
        registry: &CarrierRegistry,
        local_name: &str,
        mut stream: Box<dyn TwoWayStream>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        config: Arc<PortConfig>,
    ) -> anyhow::Result<ConnectionState> {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.context("reading handshake header")?;

        let carrier = match registry.choose_by_header(&header) {
            Ok(carrier) => carrier,
            Err(e) => {
                stream.write_all(REFUSAL.as_bytes()).await.ok();
                stream.flush().await.ok();
                return Err(e);
            }
        };

        let route = Route::new("", local_name, carrier.name());
        let mut state = ConnectionState {
            stream,
            carrier: Some(carrier),
            route,
            local_addr,
            peer_addr,
            config,
            reply_port: None,
        };

        let mut carrier = state.take_carrier()?;
        let result = async {
            carrier
                .expect_sender_specifier(&mut state)
                .await
                .context("reading sender specifier")?;
            carrier.expect_extra_header(&mut state).await.context("reading extra header")?;
            carrier.respond_to_header(&mut state).await.context("responding to header")
        }
        .await;
        state.carrier = Some(carrier);
        result?;

        debug!("accepted connection {}", state.route);
        Ok(state)
    }

    // ------------------------------------------------------------------
    // steady state, delegating to the carrier

    pub async fn write_message(&mut self, bottle: &Bottle, want_reply: bool) -> anyhow::Result<()> {
        let mut carrier = self.take_carrier()?;
        let result = carrier.write_message(self, bottle, want_reply).await;
        self.carrier = Some(carrier);
        result
    }

    pub async fn expect_message(&mut self) -> anyhow::Result<Inbound> {
        let mut carrier = self.take_carrier()?;
        let result = carrier.expect_message(self).await;
        self.carrier = Some(carrier);
        result
    }

    pub async fn write_reply(&mut self, bottle: &Bottle) -> anyhow::Result<()> {
        let mut carrier = self.take_carrier()?;
        let result = carrier.write_reply(self, bottle).await;
        self.carrier = Some(carrier);
        result
    }

    pub async fn expect_reply(&mut self) -> anyhow::Result<Bottle> {
        let mut carrier = self.take_carrier()?;
        let result = carrier.expect_reply(self).await;
        self.carrier = Some(carrier);
        result
    }

    pub async fn send_ack(&mut self) -> anyhow::Result<()> {
        let mut carrier = self.take_carrier()?;
        let result = carrier.send_ack(self).await;
        self.carrier = Some(carrier);
        result
    }

    pub async fn expect_ack(&mut self) -> anyhow::Result<()> {
        let mut carrier = self.take_carrier()?;
        let result = carrier.expect_ack(self).await;
        self.carrier = Some(carrier);
        result
    }

    pub async fn close(&mut self) {
        self.stream.flush().await.ok();
        self.stream.close().await.ok();
    }

    // ------------------------------------------------------------------
    // default choreography, called back by carrier default hooks

    pub(crate) async fn default_send_header(&mut self, header: [u8; HEADER_LEN]) -> anyhow::Result<()> {
        self.stream.write_all(&header).await?;
        let name = self.route.from.as_bytes().to_vec();
        self.stream.write_all(&(name.len() as u32).to_le_bytes()).await?;
        self.stream.write_all(&name).await?;
        self.stream.flush().await
    }

    pub(crate) async fn default_expect_sender_specifier(&mut self) -> anyhow::Result<()> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > self.config.max_name_len {
            bail!("sender name of {} bytes exceeds the limit", len);
        }
        let mut name = vec![0u8; len];
        self.stream.read_exact(&mut name).await?;
        self.route.from = String::from_utf8_lossy(&name).into_owned();
        Ok(())
    }

    pub(crate) async fn default_respond_reply_port(&mut self) -> anyhow::Result<()> {
        write_framed_int(self.stream.as_mut(), self.local_addr.port() as i32).await?;
        self.stream.flush().await
    }

    pub(crate) async fn default_expect_reply_port(&mut self) -> anyhow::Result<()> {
        let port = read_framed_int(self.stream.as_mut()).await?;
        self.reply_port = u16::try_from(port).ok();
        Ok(())
    }

    pub(crate) async fn default_write_message(&mut self, bottle: &Bottle, want_reply: bool) -> anyhow::Result<()> {
        let payload = bottle.to_binary();
        if payload.len() > self.config.max_message_len {
            bail!("message of {} bytes exceeds the limit", payload.len());
        }
        let len = payload.len() as i32;
        write_framed_int(self.stream.as_mut(), if want_reply { -len } else { len }).await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await
    }

    pub(crate) async fn default_expect_message(&mut self) -> anyhow::Result<Inbound> {
        let framed = read_framed_int(self.stream.as_mut()).await?;
        let want_reply = framed < 0;
        let len = framed.unsigned_abs() as usize;
        if len > self.config.max_message_len {
            bail!("peer announced a message of {} bytes", len);
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;

        match Bottle::try_from_binary(&payload) {
            Ok(bottle) => Ok(Inbound::Message { bottle, want_reply }),
            Err(e) => {
                debug!("undecodable payload on {}: {:#} - skipping", self.route, e);
                Ok(Inbound::Skip)
            }
        }
    }

    pub(crate) async fn default_write_reply(&mut self, bottle: &Bottle) -> anyhow::Result<()> {
        let payload = bottle.to_binary();
        write_framed_int(self.stream.as_mut(), payload.len() as i32).await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await
    }

    pub(crate) async fn default_expect_reply(&mut self) -> anyhow::Result<Bottle> {
        let framed = read_framed_int(self.stream.as_mut()).await?;
        let len = framed.unsigned_abs() as usize;
        if len > self.config.max_message_len {
            bail!("peer announced a reply of {} bytes", len);
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        // an undecodable reply degrades to an empty one
        Ok(Bottle::from_binary(&payload))
    }

    pub(crate) async fn default_send_ack(&mut self) -> anyhow::Result<()> {
        trace!("acknowledging message on {}", self.route);
        write_framed_int(self.stream.as_mut(), 0).await?;
        self.stream.flush().await
    }

    pub(crate) async fn default_expect_ack(&mut self) -> anyhow::Result<()> {
        read_framed_int(self.stream.as_mut()).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // accessors for carriers and workers

    pub fn stream(&mut self) -> &mut dyn TwoWayStream {
        self.stream.as_mut()
    }

    pub fn shift_stream(&mut self, stream: Box<dyn TwoWayStream>) {
        self.stream = stream;
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn set_from_name(&mut self, name: &str) {
        self.route.from = name.to_string();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn reply_port(&self) -> Option<u16> {
        self.reply_port
    }

    pub fn carrier_name(&self) -> String {
        self.carrier.as_ref().map(|c| c.name().to_string()).unwrap_or_default()
    }

    pub fn requires_ack(&self) -> bool {
        self.carrier.as_ref().map(|c| c.requires_ack()).unwrap_or(false)
    }

    pub fn supports_reply(&self) -> bool {
        self.carrier.as_ref().map(|c| c.supports_reply()).unwrap_or(false)
    }

    pub fn is_text_mode(&self) -> bool {
        self.carrier.as_ref().map(|c| c.is_text_mode()).unwrap_or(false)
    }

    pub fn is_connectionless(&self) -> bool {
        self.carrier.as_ref().map(|c| c.is_connectionless()).unwrap_or(false)
    }

    pub fn is_broadcast(&self) -> bool {
        self.carrier.as_ref().map(|c| c.is_broadcast()).unwrap_or(false)
    }

    pub fn broadcast_group(&self) -> Option<String> {
        self.carrier.as_ref().and_then(|c| c.broadcast_group())
    }

    fn take_carrier(&mut self) -> anyhow::Result<Box<dyn Carrier>> {
        self.carrier.take().context("connection has no carrier")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TcpTwoWay;
    use rstest::rstest;
    use tokio::net::{TcpListener, TcpStream};

    async fn stream_pair() -> (ConnectionStateParts, ConnectionStateParts) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let client_parts = ConnectionStateParts {
            local: client.local_addr().unwrap(),
            peer: client.peer_addr().unwrap(),
            stream: Box::new(TcpTwoWay::new(client)),
        };
        let server_parts = ConnectionStateParts {
            local: server.local_addr().unwrap(),
            peer: server.peer_addr().unwrap(),
            stream: Box::new(TcpTwoWay::new(server)),
        };
        (client_parts, server_parts)
    }

    struct ConnectionStateParts {
        local: SocketAddr,
        peer: SocketAddr,
        stream: Box<dyn TwoWayStream>,
    }

    async fn handshake(carrier: &str) -> (ConnectionState, ConnectionState) {
        let registry = Arc::new(CarrierRegistry::with_defaults());
        let config = Arc::new(PortConfig::default());
        let (client, server) = stream_pair().await;

        let registry2 = registry.clone();
        let config2 = config.clone();
        let acceptor = tokio::spawn(async move {
            ConnectionState::open_acceptor(&registry2, "/in", server.stream, server.local, server.peer, config2)
                .await
                .unwrap()
        });

        let initiator = ConnectionState::open_initiator(
            &registry,
            Route::new("/out", "/in", carrier),
            client.stream,
            client.local,
            client.peer,
            config,
        )
        .await
        .unwrap();

        (initiator, acceptor.await.unwrap())
    }

    #[rstest]
    #[case::tcp("tcp")]
    #[case::fast_tcp("fast_tcp")]
    #[case::text("text")]
    #[case::udp("udp")]
    #[tokio::test]
    async fn test_handshake_fills_route(#[case] carrier: &str) {
        let (initiator, acceptor) = handshake(carrier).await;
        assert_eq!(acceptor.route().from, "/out");
        assert_eq!(acceptor.route().to, "/in");
        assert_eq!(acceptor.route().carrier, carrier);
        assert_eq!(initiator.carrier_name(), carrier);
    }

    #[rstest]
    #[case::tcp("tcp")]
    #[case::fast_tcp("fast_tcp")]
    #[case::text("text")]
    #[case::udp("udp")]
    #[tokio::test]
    async fn test_messages_arrive_in_order(#[case] carrier: &str) {
        let (mut initiator, mut acceptor) = handshake(carrier).await;
        let requires_ack = initiator.requires_ack();

        let writer = tokio::spawn(async move {
            for i in 0..5 {
                let mut b = Bottle::new();
                b.add_string("seq");
                b.add_i32(i);
                initiator.write_message(&b, false).await.unwrap();
                if requires_ack {
                    initiator.expect_ack().await.unwrap();
                }
            }
            initiator
        });

        for i in 0..5 {
            let inbound = acceptor.expect_message().await.unwrap();
            match inbound {
                Inbound::Message { bottle, want_reply } => {
                    assert!(!want_reply);
                    assert_eq!(bottle.get(1).as_i32(), Some(i));
                }
                Inbound::Skip => panic!("unexpected skip"),
            }
            acceptor.send_ack().await.unwrap();
        }
        writer.await.unwrap();
    }

    #[rstest]
    #[case::tcp("tcp")]
    #[case::text("text")]
    #[tokio::test]
    async fn test_request_reply(#[case] carrier: &str) {
        let (mut initiator, mut acceptor) = handshake(carrier).await;

        let server = tokio::spawn(async move {
            let inbound = acceptor.expect_message().await.unwrap();
            let Inbound::Message { bottle, want_reply } = inbound else {
                panic!("unexpected skip")
            };
            assert!(want_reply);
            assert_eq!(bottle.get(0).as_str(), Some("COUNT"));

            let mut reply = Bottle::new();
            reply.add_string("ACK");
            reply.add(bottle.get(1).clone());
            acceptor.write_reply(&reply).await.unwrap();
            acceptor.send_ack().await.unwrap();
        });

        let mut command = Bottle::new();
        command.add_string("COUNT");
        command.add_i32(3);
        initiator.write_message(&command, true).await.unwrap();
        let reply = initiator.expect_reply().await.unwrap();
        initiator.expect_ack().await.unwrap();

        assert_eq!(reply.to_text(), "ACK 3");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_header_is_refused() {
        let registry = CarrierRegistry::with_defaults();
        let config = Arc::new(PortConfig::default());
        let (mut client, server) = stream_pair().await;

        let acceptor = tokio::spawn(async move {
            ConnectionState::open_acceptor(&registry, "/in", server.stream, server.local, server.peer, config).await
        });

        client.stream.write_all(b"GARBAGE!").await.unwrap();
        client.stream.flush().await.unwrap();

        assert!(acceptor.await.unwrap().is_err());
        // the refusal is human-readable text
        let line = client.stream.read_line().await.unwrap();
        assert!(line.starts_with("* Error"));
    }

    #[tokio::test]
    async fn test_oversized_length_is_framing_error() {
        let (mut initiator, mut acceptor) = handshake("fast_tcp").await;

        write_framed_int(initiator.stream(), i32::MAX).await.unwrap();
        initiator.stream().flush().await.unwrap();

        assert!(acceptor.expect_message().await.is_err());
    }
}
