//! Payload codec: raw message bytes ↔ text field of a log row.

use base64::Engine;
use tape_api::PayloadEncoding;

use crate::error::TapeError;

/// Encode payload bytes for storage in the log.
///
/// `Text` rejects payloads that are not valid UTF-8 instead of storing a
/// lossy conversion.
pub fn encode_payload(encoding: PayloadEncoding, payload: &[u8]) -> Result<String, TapeError> {
    match encoding {
        PayloadEncoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.encode(payload)),
        PayloadEncoding::Text => std::str::from_utf8(payload)
            .map(str::to_owned)
            .map_err(|e| TapeError::Codec(format!("payload is not valid UTF-8: {e}"))),
    }
}

/// Decode a stored payload field back to the bytes to publish.
pub fn decode_payload(encoding: PayloadEncoding, stored: &str) -> Result<Vec<u8>, TapeError> {
    match encoding {
        PayloadEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(stored)
            .map_err(|e| TapeError::Codec(format!("invalid base64: {e}"))),
        PayloadEncoding::Text => Ok(stored.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn base64_uses_standard_alphabet_with_padding() {
        let encoded = encode_payload(PayloadEncoding::Base64, &[0xfb, 0xff, 0x00]).unwrap();
        assert_eq!(encoded, "+/8A");
        let encoded = encode_payload(PayloadEncoding::Base64, b"ab").unwrap();
        assert_eq!(encoded, "YWI=");
    }

    #[test]
    fn text_passes_utf8_through() {
        let encoded = encode_payload(PayloadEncoding::Text, "température: 21°C".as_bytes()).unwrap();
        assert_eq!(encoded, "température: 21°C");
        let decoded = decode_payload(PayloadEncoding::Text, &encoded).unwrap();
        assert_eq!(decoded, "température: 21°C".as_bytes());
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let err = encode_payload(PayloadEncoding::Text, &[0x66, 0x6f, 0xff]).unwrap_err();
        assert!(matches!(err, TapeError::Codec(_)));
    }

    #[test]
    fn invalid_base64_is_a_codec_error() {
        let err = decode_payload(PayloadEncoding::Base64, "not*base64").unwrap_err();
        assert!(matches!(err, TapeError::Codec(_)));
    }

    #[test]
    fn empty_payload_round_trips() {
        for encoding in [PayloadEncoding::Text, PayloadEncoding::Base64] {
            let encoded = encode_payload(encoding, b"").unwrap();
            assert_eq!(encoded, "");
            assert!(decode_payload(encoding, &encoded).unwrap().is_empty());
        }
    }

    proptest! {
        #[test]
        fn base64_round_trips_any_bytes(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode_payload(PayloadEncoding::Base64, &payload).unwrap();
            prop_assert_eq!(decode_payload(PayloadEncoding::Base64, &encoded).unwrap(), payload);
        }

        #[test]
        fn text_round_trips_any_string(text in ".*") {
            let encoded = encode_payload(PayloadEncoding::Text, text.as_bytes()).unwrap();
            prop_assert_eq!(decode_payload(PayloadEncoding::Text, &encoded).unwrap(), text.into_bytes());
        }
    }
}
