//! Frame layout and wire conventions for the simulated VHF data link.

pub mod bits;
pub mod crc;
pub mod messages;

pub use messages::{
    AisMessage, CommState, ItdmaState, MessageError, PositionReport, SotdmaState, StaticVoyage,
    SubMessage,
};

/// Ramp-up bits preceding every frame, 0xFF.
pub const RAMP_UP_BITS: &str = "11111111";

/// 24-bit synchronisation sequence, 0xAAAAAA.
pub const SYNC_SEQUENCE: &str = "101010101010101010101010";

/// HDLC-style start flag, 0x7E.
pub const START_FLAG: &str = "01111110";

/// HDLC-style end flag, 0x7E.
pub const END_FLAG: &str = "01111110";

/// 23 buffer bits closing every frame.
pub const BUFFER_BITS: &str = "11111111111111111111111";

/// Largest datagram a channel endpoint must accept.
pub const MAX_DATAGRAM_SIZE: usize = 5096;

/// Encode a frame bitstring into its on-wire form.
///
/// The simulator exchanges literal ASCII `'0'`/`'1'` characters, not
/// packed bits. This is a wire contract shared with the rest of the
/// simulation and must be preserved.
pub fn encode(frame: &str) -> Vec<u8> {
    frame.as_bytes().to_vec()
}

/// Decode a received datagram back into a frame bitstring.
///
/// Anything that is not an ASCII string of `'0'`/`'1'` characters
/// (modulo surrounding whitespace) is reported as a corrupted frame.
pub fn decode(datagram: &[u8]) -> Result<&str, MessageError> {
    let text = std::str::from_utf8(datagram).map_err(|_| MessageError::Corrupted)?;
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b == b'0' || b == b'1') {
        return Err(MessageError::Corrupted);
    }
    Ok(text)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_is_ascii_bitstring() {
        assert_eq!(encode("0110"), b"0110".to_vec());
    }

    #[test]
    fn decode_roundtrip() {
        assert_eq!(decode(b"010011"), Ok("010011"));
        assert_eq!(decode(b"  010011\n"), Ok("010011"));
    }

    #[test]
    fn decode_rejects_non_bits() {
        assert_eq!(decode(b"01x0"), Err(MessageError::Corrupted));
        assert_eq!(decode(b""), Err(MessageError::Corrupted));
        assert_eq!(decode(&[0xff, 0xfe]), Err(MessageError::Corrupted));
    }
}
