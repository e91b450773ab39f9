use async_trait::async_trait;
use tracing::debug;

use crate::bottle::Bottle;
use crate::protocol::connection_state::ConnectionState;

use super::carrier::{Carrier, Inbound};
use super::specifier::HEADER_LEN;

const GREETING: &[u8; HEADER_LEN] = b"CONNECT ";

/// Human-typable carrier: the whole conversation is newline-terminated text. The
///  handshake header is the literal `"CONNECT "` so a person with a raw socket reaches a
///  port by typing `CONNECT myname`. A bare line is a request expecting a reply line; a
///  `"d "`-prefixed line is one-way data.
#[derive(Clone)]
pub struct TextCarrier;

impl TextCarrier {
    pub fn new() -> TextCarrier {
        TextCarrier
    }
}

impl Default for TextCarrier {
    fn default() -> TextCarrier {
        TextCarrier::new()
    }
}

#[async_trait]
impl Carrier for TextCarrier {
    fn name(&self) -> &str {
        "text"
    }

    fn fresh(&self) -> Box<dyn Carrier> {
        Box::new(self.clone())
    }

    fn check_header(&self, header: &[u8; HEADER_LEN]) -> bool {
        header == GREETING
    }

    fn write_header(&self, header: &mut [u8; HEADER_LEN]) {
        header.copy_from_slice(GREETING);
    }

    fn supports_reply(&self) -> bool {
        true
    }

    fn is_text_mode(&self) -> bool {
        true
    }

    async fn send_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let line = format!("CONNECT {}\r\n", proto.route().from);
        proto.stream().write_all(line.as_bytes()).await?;
        proto.stream().flush().await
    }

    async fn expect_sender_specifier(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        // the 8 bytes "CONNECT " are already consumed; the rest of the line is the name
        let rest = proto.stream().read_line().await?;
        proto.set_from_name(rest.trim());
        Ok(())
    }

    async fn respond_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let line = format!("Welcome {}\r\n", proto.route().from);
        proto.stream().write_all(line.as_bytes()).await?;
        proto.stream().flush().await
    }

    async fn expect_reply_to_header(&mut self, proto: &mut ConnectionState) -> anyhow::Result<()> {
        let welcome = proto.stream().read_line().await?;
        debug!("text carrier greeted: {:?}", welcome);
        Ok(())
    }

    async fn write_message(
        &mut self,
        proto: &mut ConnectionState,
        bottle: &Bottle,
        want_reply: bool,
    ) -> anyhow::Result<()> {
        let line = if want_reply {
            format!("{}\n", bottle.to_text())
        } else {
            format!("d {}\n", bottle.to_text())
        };
        proto.stream().write_all(line.as_bytes()).await?;
        proto.stream().flush().await
    }

    async fn expect_message(&mut self, proto: &mut ConnectionState) -> anyhow::Result<Inbound> {
        let line = proto.stream().read_line().await?;
        if line.trim().is_empty() {
            return Ok(Inbound::Skip);
        }
        if let Some(data) = line.strip_prefix("d ").or(if line == "d" { Some("") } else { None }) {
            return Ok(Inbound::Message { bottle: Bottle::from_text(data), want_reply: false });
        }
        Ok(Inbound::Message { bottle: Bottle::from_text(&line), want_reply: true })
    }

    async fn write_reply(&mut self, proto: &mut ConnectionState, bottle: &Bottle) -> anyhow::Result<()> {
        let line = format!("{}\n", bottle.to_text());
        proto.stream().write_all(line.as_bytes()).await?;
        proto.stream().flush().await
    }

    async fn expect_reply(&mut self, proto: &mut ConnectionState) -> anyhow::Result<Bottle> {
        let line = proto.stream().read_line().await?;
        Ok(Bottle::from_text(&line))
    }
}
