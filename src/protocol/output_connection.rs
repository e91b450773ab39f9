use anyhow::{bail, Context};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::bottle::Bottle;
use crate::carrier::{CarrierRegistry, Election};
use crate::net::TcpTwoWay;
use crate::port::{Contact, PortConfig, Route};

use super::connection_state::ConnectionState;

/// The write side of one outbound connection. Writes are whole framed messages,
///  serialized under the connection's own lock; ack-requiring carriers block the write
///  until the peer's acknowledgment arrives. Broadcast outputs consult the election and
///  stay silent unless they are the elect sender for their group.
pub struct OutputConnection {
    id: u64,
    route: Route,
    supports_reply: bool,
    state: Mutex<ConnectionState>,
    config: Arc<PortConfig>,
    election_key: Option<String>,
    election: Arc<Election<String>>,
}

impl OutputConnection {
    /// Dial the destination and run the handshake as initiator. On any failure the
    ///  connection attempt is abandoned whole - no partial state escapes.
    pub async fn connect(
        registry: &CarrierRegistry,
        election: Arc<Election<String>>,
        id: u64,
        route: Route,
        contact: &Contact,
        config: Arc<PortConfig>,
    ) -> anyhow::Result<OutputConnection> {
        let stream = TcpStream::connect((contact.host.as_str(), contact.port))
            .await
            .with_context(|| format!("dialing {} at {}", route.to, contact))?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;

        let state = timeout(
            config.handshake_timeout,
            ConnectionState::open_initiator(
                registry,
                route,
                Box::new(TcpTwoWay::new(stream)),
                local_addr,
                peer_addr,
                config.clone(),
            ),
        )
        .await
        .context("handshake timed out")??;

        let election_key = state.broadcast_group();
        if let Some(key) = &election_key {
            election.add(key.clone(), id);
            debug!("output {} registered for group {:?}", id, key);
        }

        Ok(OutputConnection {
            id,
            route: state.route().clone(),
            supports_reply: state.supports_reply(),
            state: Mutex::new(state),
            config,
            election_key,
            election,
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn supports_reply(&self) -> bool {
        self.supports_reply
    }

    /// One-way write of a whole framed message. Returns once the message is fully
    ///  written (and acknowledged, for ack carriers). A non-elect broadcast output
    ///  silently skips the send - its group's elect sender covers for it.
    pub async fn write(&self, bottle: &Bottle) -> anyhow::Result<()> {
        if let Some(key) = &self.election_key {
            if !self.election.is_elect(key, self.id) {
                trace!("output {} is not elect for {:?} - skipping send", self.id, key);
                return Ok(());
            }
        }

        let mut state = self.state.lock().await;
        state.write_message(bottle, false).await?;
        if state.requires_ack() {
            timeout(self.config.ack_timeout, state.expect_ack())
                .await
                .context("ack timed out")??;
        }
        Ok(())
    }

    /// RPC write: send the command, block for the peer's reply over the back channel.
    pub async fn write_with_reply(&self, bottle: &Bottle) -> anyhow::Result<Bottle> {
        if !self.supports_reply {
            bail!("connection {} does not support replies (try \"tcp\" or \"text\")", self.route);
        }

        let mut state = self.state.lock().await;
        state.write_message(bottle, true).await?;
        // the reply leg is unbounded - the peer may legitimately take its time - but the
        // trailing ack is not
        let reply = state.expect_reply().await?;
        if state.requires_ack() {
            timeout(self.config.ack_timeout, state.expect_ack())
                .await
                .context("ack timed out")??;
        }
        Ok(reply)
    }

    pub async fn close(&self) {
        if let Some(key) = &self.election_key {
            self.election.remove(key, self.id);
        }
        self.state.lock().await.close().await;
    }
}
