use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const HEADER_LEN: usize = 8;

/// Ack-required flag in the first header byte.
pub const ACK_FLAG: u8 = 0x80;

/// Carrier family identifier carried in the low nibble of the first header byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SpecifierCode {
    Udp = 1,
    Mcast = 2,
    StreamTcp = 3,
}

/// Magic pair in bytes 1-2 of every binary carrier header. This is what keeps the binary
///  family headers disjoint from text-mode greetings whose first byte happens to carry a
///  plausible specifier nibble.
const MAGIC: [u8; 2] = *b"pt";

pub fn encode_header(code: SpecifierCode, ack: bool) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = u8::from(code) | if ack { ACK_FLAG } else { 0 };
    header[1..3].copy_from_slice(&MAGIC);
    header
}

/// Bytes 3-7 are don't-care unless a carrier defines them.
pub fn matches(header: &[u8; HEADER_LEN], code: SpecifierCode, ack: bool) -> bool {
    let first = header[0];
    first & 0x0f == u8::from(code) && (first & ACK_FLAG != 0) == ack && header[1..3] == MAGIC
}

pub fn specifier_of(header: &[u8; HEADER_LEN]) -> Option<SpecifierCode> {
    SpecifierCode::try_from(header[0] & 0x0f).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SpecifierCode::Udp, false)]
    #[case(SpecifierCode::Mcast, false)]
    #[case(SpecifierCode::StreamTcp, true)]
    #[case(SpecifierCode::StreamTcp, false)]
    fn test_roundtrip(#[case] code: SpecifierCode, #[case] ack: bool) {
        let header = encode_header(code, ack);
        assert!(matches(&header, code, ack));
        assert!(!matches(&header, code, !ack));
        assert_eq!(specifier_of(&header), Some(code));
    }

    #[test]
    fn test_trailing_bytes_dont_care() {
        let mut header = encode_header(SpecifierCode::Udp, false);
        header[5] = 0xAB;
        assert!(matches(&header, SpecifierCode::Udp, false));
    }
}
