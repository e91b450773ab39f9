use super::carrier::Carrier;
use super::specifier::{self, SpecifierCode, HEADER_LEN};

/// The stream carrier family. `tcp` is the reliable variant: per-message acks, reply
///  port exchange during the handshake, request/reply over the same socket. `fast_tcp`
///  is the same wire format minus the ack traffic - one-way streaming with lower
///  latency. Both share specifier code 3 and are told apart by the ack flag, so a `tcp`
///  initiator reaching a port is never confused with a `fast_tcp` one.
#[derive(Clone)]
pub struct TcpCarrier {
    ack: bool,
}

impl TcpCarrier {
    pub fn reliable() -> TcpCarrier {
        TcpCarrier { ack: true }
    }

    pub fn fast() -> TcpCarrier {
        TcpCarrier { ack: false }
    }
}

impl Carrier for TcpCarrier {
    fn name(&self) -> &str {
        if self.ack {
            "tcp"
        } else {
            "fast_tcp"
        }
    }

    fn fresh(&self) -> Box<dyn Carrier> {
        Box::new(self.clone())
    }

    fn check_header(&self, header: &[u8; HEADER_LEN]) -> bool {
        specifier::matches(header, SpecifierCode::StreamTcp, self.ack)
    }

    fn write_header(&self, header: &mut [u8; HEADER_LEN]) {
        *header = specifier::encode_header(SpecifierCode::StreamTcp, self.ack);
    }

    fn requires_ack(&self) -> bool {
        self.ack
    }

    fn supports_reply(&self) -> bool {
        self.ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_distinguished_by_ack_flag() {
        let tcp = TcpCarrier::reliable();
        let fast = TcpCarrier::fast();

        let mut tcp_header = [0u8; HEADER_LEN];
        tcp.write_header(&mut tcp_header);
        let mut fast_header = [0u8; HEADER_LEN];
        fast.write_header(&mut fast_header);

        assert!(tcp.check_header(&tcp_header));
        assert!(!tcp.check_header(&fast_header));
        assert!(fast.check_header(&fast_header));
        assert!(!fast.check_header(&tcp_header));
    }
}
