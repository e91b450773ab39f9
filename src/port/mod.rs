//! The per-endpoint connection manager and its supporting types.

pub mod config;
pub mod events;
pub mod mailbox;
pub mod port_core;
pub mod route;

pub use config::PortConfig;
pub use events::PortEvent;
pub use port_core::{MessageSink, PortContext, PortCore, Replier};
pub use route::{Contact, Route};
