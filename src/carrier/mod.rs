//! The pluggable wire-protocol layer: one [`Carrier`] implementation per transport
//!  variant, a registry dispatching handshake headers to prototypes, and the multicast
//!  sender election.

mod carrier;
mod election;
mod mcast;
mod registry;
mod specifier;
mod tcp;
mod text;
mod udp;

pub use carrier::{Carrier, Inbound};
pub use election::Election;
pub use mcast::McastCarrier;
pub use registry::CarrierRegistry;
pub use specifier::{specifier_of, SpecifierCode, ACK_FLAG, HEADER_LEN};
pub use tcp::TcpCarrier;
pub use text::TextCarrier;
pub use udp::UdpCarrier;
