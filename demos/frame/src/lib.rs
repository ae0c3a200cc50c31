//! A small length-prefixed, checksummed frame format built from `strux` constructs,
//! demonstrating `Embed`, `Prefixed`, `Anchor`, and `Checksum` working together, plus
//! `strux_macros::Layout` for the embedded header.
//!
//! Layout: a 4-byte magic, an embedded header (`kind`, `seq`), a length-prefixed
//! payload, and a CRC-32 over everything between the magic and the checksum itself.

use strux::{Construct, HashFn, Value};
use strux_macros::Layout;

const MAGIC: &[u8] = b"FRAM";

#[derive(Layout)]
struct FrameHeader {
    #[strux(Construct::enum_map(Construct::u8_(), vec![(1, "data"), (2, "control"), (3, "ping")]))]
    kind: (),
    #[strux(Construct::u16_be())]
    seq: (),
}

/// The whole-frame layout: `magic | body{body}... | crc32(body)`.
pub fn frame_layout() -> Construct {
    Construct::struct_(vec![
        Construct::const_(Construct::bytes(MAGIC.len()), Value::Bytes(MAGIC.to_vec())).named("magic"),
        Construct::anchor().named("body"),
        Construct::embed(FrameHeader::layout()),
        Construct::prefixed(Construct::u16_be(), Construct::greedy_bytes()).named("payload"),
        Construct::anchor().named("body"),
        Construct::checksum("body", HashFn::crc32(), Construct::bytes(4)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sample_frame() {
        let bytes = include_bytes!("../tests/sample.frame");
        let parsed = frame_layout().parse(bytes).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("kind").unwrap().as_str().unwrap(), "control");
        assert_eq!(container.get("seq").unwrap().as_int().unwrap(), 0x41);
        assert_eq!(container.get("payload").unwrap().as_bytes().unwrap(), b"hello frame");
    }

    #[test]
    fn round_trips() {
        let bytes = include_bytes!("../tests/sample.frame");
        let parsed = frame_layout().parse(bytes).unwrap();
        let rebuilt = frame_layout().build(&parsed).unwrap();
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let bytes = include_bytes!("../tests/sample.frame");
        let mut tampered = bytes.to_vec();
        let last = tampered.len() - 5;
        tampered[last] ^= 0xFF;
        assert!(matches!(frame_layout().parse(&tampered), Err(strux::Error::Checksum { .. })));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = include_bytes!("../tests/sample.frame").to_vec();
        bytes[0] = b'X';
        assert!(frame_layout().parse(&bytes).is_err());
    }
}
