use std::net::SocketAddr;
use std::time::Duration;

pub struct PortConfig {
    /// Address the port's listening socket binds to. Port 0 lets the OS pick; the chosen
    ///  port is what gets registered with name resolution.
    pub bind_addr: SocketAddr,

    /// Upper bound for a single framed message. Incoming length prefixes beyond this are
    ///  treated as framing corruption rather than honored with an allocation.
    pub max_message_len: usize,

    /// Cap on the sender-name length accepted during a handshake.
    pub max_name_len: usize,

    /// A handshake (either side) that has not completed within this window is treated as
    ///  a failed connection attempt.
    pub handshake_timeout: Duration,

    /// How long an ack-requiring write waits for the peer's acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> PortConfig {
        PortConfig {
            bind_addr: "127.0.0.1:0".parse().expect("literal addr"),
            max_message_len: 16 * 1024 * 1024,
            max_name_len: 1024,
            handshake_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}
