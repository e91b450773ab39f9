//! Port-to-port messaging middleware for distributed, loosely coupled components
//!  (robotics and sensor / actuator networks being the primary domain). Named endpoints
//!  ("ports") exchange self-describing messages over negotiated, pluggable wire protocols
//!  ("carriers").
//!
//! ## Design goals
//!
//! * A port is a named network endpoint holding many simultaneous connections, each of
//!   which may speak a different carrier
//!   * carriers are looked up polymorphically by name or by handshake header, never by
//!     concrete type - new transports plug in through the registry without touching the
//!     negotiation engine
//!   * one port, many readers and writers: inbound connections each get their own worker
//!     task, outbound writes fan out to every connected peer
//! * The payload encoding is self-describing and dynamically typed (`Bottle` / `Value`):
//!   a nested, ordered list of tagged values with mutually inverse binary and text
//!   renderings
//!   * the same logical content can travel as length-framed binary between processes or as
//!     a newline-terminated line typed by a human over a raw socket
//! * Messages from one sender to one receiver over one connection arrive in send order
//!   (stream semantics); no ordering is guaranteed across connections
//! * A send fans out to the outputs present when the call was made - a slow or dead peer
//!   never blocks delivery to the others, and never blocks structural changes to the
//!   connection table
//! * Reply-capable carriers carry a synchronous request / reply conversation over the same
//!   connection (ping-pong), enabling RPC on top of the ordinary streaming path
//! * Multicast outputs sharing one group elect a single sender, so several logical
//!   connections produce one packet on the wire
//!
//! ## Handshake header
//!
//! Every connection is negotiated over a stream to the accepting port's listening socket.
//! The first 8 bytes identify the carrier:
//!
//! ```ascii
//! 0:  low nibble: specifier code (1 = udp, 2 = mcast, 3 = tcp stream family)
//!     bit 7: ack required
//! 1-2: 'p' 't' magic marking a binary carrier header
//! 3-7: carrier specific, zero padded - treated as don't-care unless a carrier
//!      defines them
//! ```
//!
//! The text carrier instead matches the ASCII bytes `"CONNECT "` so that a human with a
//! raw socket can reach a port by typing. After the header comes the sender name
//! (u32 LE length + UTF-8 bytes), any carrier-specific extra header, and the carrier's
//! response. Datagram carriers finish negotiation by exchanging endpoints and shifting
//! the connection off the negotiation stream onto sockets of their own.
//!
//! ## Framing
//!
//! Control numbers (message lengths, acks, reply ports) travel as 8-byte framed ints:
//!
//! ```ascii
//! 0: 'P' 'N'
//! 2: i32 (LE)
//! 6: 'E' 'T'
//! ```
//!
//! A violated guard byte is framing corruption and tears the connection down. Binary
//! messages are `framed int length + payload`; a negative length marks a message that
//! expects a reply. Text messages are one line each, `"d "`-prefixed when no reply is
//! expected.

pub mod bottle;
pub mod carrier;
pub mod name;
pub mod net;
pub mod port;
pub mod protocol;

#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
