use anyhow::bail;

use super::carrier::Carrier;
use super::specifier::HEADER_LEN;
use super::{McastCarrier, TcpCarrier, TextCarrier, UdpCarrier};

/// Name -> prototype -> per-connection instance. Registration happens at process start,
///  before any port might need the carrier; lookups afterwards are read-only and safe to
///  run concurrently from many handshakes.
///
/// Header dispatch walks prototypes in registration order and the first match wins - the
///  defined tie-break for carriers with overlapping headers (deployments should simply
///  avoid registering such pairs).
pub struct CarrierRegistry {
    prototypes: Vec<Box<dyn Carrier>>,
}

impl CarrierRegistry {
    pub fn new() -> CarrierRegistry {
        CarrierRegistry { prototypes: Vec::new() }
    }

    /// The stock carrier set.
    pub fn with_defaults() -> CarrierRegistry {
        let mut registry = CarrierRegistry::new();
        registry.add_prototype(Box::new(TcpCarrier::reliable())).expect("stock carrier");
        registry.add_prototype(Box::new(TcpCarrier::fast())).expect("stock carrier");
        registry.add_prototype(Box::new(TextCarrier::new())).expect("stock carrier");
        registry.add_prototype(Box::new(UdpCarrier::new())).expect("stock carrier");
        registry.add_prototype(Box::new(McastCarrier::new())).expect("stock carrier");
        registry
    }

    pub fn add_prototype(&mut self, carrier: Box<dyn Carrier>) -> anyhow::Result<()> {
        if self.prototypes.iter().any(|p| p.name() == carrier.name()) {
            bail!("carrier {:?} is already registered", carrier.name());
        }
        self.prototypes.push(carrier);
        Ok(())
    }

    pub fn choose_by_name(&self, name: &str) -> anyhow::Result<Box<dyn Carrier>> {
        match self.prototypes.iter().find(|p| p.name() == name) {
            Some(prototype) => Ok(prototype.fresh()),
            None => bail!("unknown carrier {:?}", name),
        }
    }

    pub fn choose_by_header(&self, header: &[u8; HEADER_LEN]) -> anyhow::Result<Box<dyn Carrier>> {
        match self.prototypes.iter().find(|p| p.check_header(header)) {
            Some(prototype) => Ok(prototype.fresh()),
            None => bail!("carrier not recognized from header {:?}", header),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.prototypes.iter().map(|p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::specifier::HEADER_LEN;

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = CarrierRegistry::new();
        registry.add_prototype(Box::new(UdpCarrier::new())).unwrap();
        assert!(registry.add_prototype(Box::new(UdpCarrier::new())).is_err());
    }

    #[test]
    fn test_unknown_name_fails() {
        let registry = CarrierRegistry::with_defaults();
        assert!(registry.choose_by_name("carrier_from_mars").is_err());
    }

    #[test]
    fn test_choose_by_name_returns_fresh_instance() {
        let registry = CarrierRegistry::with_defaults();
        let a = registry.choose_by_name("tcp").unwrap();
        assert_eq!(a.name(), "tcp");
        assert!(a.requires_ack());
        let b = registry.choose_by_name("fast_tcp").unwrap();
        assert!(!b.requires_ack());
    }

    /// No header produced by one registered carrier may be claimed by another.
    #[test]
    fn test_handshake_determinism() {
        let registry = CarrierRegistry::with_defaults();
        let names: Vec<String> = registry.names().map(str::to_string).collect();
        for name in &names {
            let carrier = registry.choose_by_name(name).unwrap();
            let mut header = [0u8; HEADER_LEN];
            carrier.write_header(&mut header);

            let matched = registry.choose_by_header(&header).unwrap();
            assert_eq!(matched.name(), name.as_str(), "header of {:?} dispatched to {:?}", name, matched.name());

            for other in &names {
                if other != name {
                    let other_carrier = registry.choose_by_name(other).unwrap();
                    assert!(
                        !other_carrier.check_header(&header),
                        "{:?} also accepts the header of {:?}",
                        other,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn test_unrecognized_header() {
        let registry = CarrierRegistry::with_defaults();
        let header = [0xFFu8; HEADER_LEN];
        assert!(registry.choose_by_header(&header).is_err());
    }
}
