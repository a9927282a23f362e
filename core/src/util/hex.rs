//! Byte/hex conversion.
//!
//! Thin, crate-local wrapper around the `hex` crate so call sites depend
//! on one name (`junction_core::util::hex`) regardless of which
//! third-party crate backs it.

/// Encode `bytes` as a lowercase hex string.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hex string (upper or lower case) back into bytes.
///
/// # Errors
///
/// Returns an error if `s` has odd length or contains non-hex digits.
pub fn to_bytes(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let cases: &[&[u8]] = &[
            b"",
            b"\x00",
            b"\xff",
            b"Hello, World!",
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 255, 254, 128, 127],
        ];
        for case in cases {
            let hex = to_hex(case);
            assert_eq!(to_bytes(&hex).unwrap(), *case);
        }
    }

    #[test]
    fn output_is_lowercase() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        let encoded = to_hex(&bytes);
        assert_eq!(encoded, "deadbeef");
        assert!(encoded.chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn decode_accepts_uppercase() {
        assert_eq!(to_bytes("DEADBEEF").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert!(to_bytes("abc").is_err());
    }
}
