use std::fmt;

/// One logical connection: source port name, destination port name, carrier name.
/// Immutable after establishment, except that the carrier may be rewritten once during
///  negotiation when the handshake discovers the peer actually speaks a sibling carrier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    pub from: String,
    pub to: String,
    pub carrier: String,
}

impl Route {
    pub fn new(from: impl Into<String>, to: impl Into<String>, carrier: impl Into<String>) -> Route {
        Route {
            from: from.into(),
            to: to.into(),
            carrier: carrier.into(),
        }
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Route {
        self.carrier = carrier.into();
        self
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.carrier)
    }
}

/// Where a named port can be reached, as handed back by name resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub host: String,
    pub port: u16,
    pub carrier_hint: Option<String>,
}

impl Contact {
    pub fn new(host: impl Into<String>, port: u16) -> Contact {
        Contact {
            host: host.into(),
            port,
            carrier_hint: None,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
