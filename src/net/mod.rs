//! Stream abstraction and control-number framing shared by every carrier.

pub mod framing;
pub mod two_way_stream;

pub use two_way_stream::{DgramTwoWay, TcpTwoWay, TwoWayStream};
