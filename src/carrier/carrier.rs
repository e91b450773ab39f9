use async_trait::async_trait;

use crate::bottle::Bottle;
use crate::protocol::connection_state::ConnectionState;

use super::specifier::HEADER_LEN;

/// Result of one read cycle on an established connection. A payload the decoder rejects
///  is `Skip` - no data this cycle, keep reading; transport-level trouble is an `Err`.
pub enum Inbound {
    Message { bottle: Bottle, want_reply: bool },
    Skip,
}

/// One named wire-protocol variant. The registry owns a prototype per name; [`fresh`]
///  produces the per-connection instance that the owning connection drives through the
///  handshake and steady-state hooks below and destroys on close.
///
/// Hooks receive the [`ConnectionState`] they belong to and default to its standard
///  choreography, so a minimal carrier only describes its header and capability flags.
/// Carriers with their own wire behavior (text framing, datagram shifting) override the
///  hooks they need - composition over subclassing.
///
/// [`fresh`]: Carrier::fresh
#[async_trait]
pub trait Carrier: Send + Sync {
    fn name(&self) -> &str;

    fn fresh(&self) -> Box<dyn Carrier>;

    /// Does an incoming 8-byte handshake header belong to this carrier?
    fn check_header(&self, header: &[u8; HEADER_LEN]) -> bool;

    fn write_header(&self, header: &mut [u8; HEADER_LEN]);

    fn requires_ack(&self) -> bool {
        false
    }

    fn is_connectionless(&self) -> bool {
        false
    }

    fn is_broadcast(&self) -> bool {
        false
    }

    fn supports_reply(&self) -> bool {
        false
    }

    fn is_text_mode(&self) -> bool {
        false
    }

    /// Broadcast carriers return the key their local outputs share for sender election.
    fn broadcast_group(&self) -> Option<String> {
        None
    }

    // ------------------------------------------------------------------
    // initiating side

    async fn send_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.write_header(&mut header);
        proto.default_send_header(header).await
    }

    async fn expect_reply_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        if self.requires_ack() {
            proto.default_expect_reply_port().await
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // accepting side - the 8-byte header was already consumed by registry dispatch

    async fn expect_sender_specifier(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        proto.default_expect_sender_specifier().await
    }

    async fn expect_extra_header(&mut self, _proto: &mut ConnectionState) -> anyhow::Result<()> {
        Ok(())
    }

    async fn respond_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        if self.requires_ack() {
            proto.default_respond_reply_port().await
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // steady state

    async fn write_message(
        &mut self,
        proto: &mut ConnectionState,
        bottle: &Bottle,
        want_reply: bool,
    ) -> anyhow::Result<()> {
        proto.default_write_message(bottle, want_reply).await
    }

    async fn expect_message(&mut self, proto: &mut ConnectionState) -> anyhow::Result<Inbound> {
        proto.default_expect_message().await
    }

    async fn write_reply(&mut self, proto: &mut ConnectionState, bottle: &Bottle) -> anyhow::Result<()> {
        proto.default_write_reply(bottle).await
    }

    async fn expect_reply(&mut self, proto: &mut ConnectionState) -> anyhow::Result<Bottle> {
        proto.default_expect_reply().await
    }

    async fn send_ack(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        if self.requires_ack() {
            proto.default_send_ack().await
        } else {
            Ok(())
        }
    }

    async fn expect_ack(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        if self.requires_ack() {
            proto.default_expect_ack().await
        } else {
            Ok(())
        }
    }
}
