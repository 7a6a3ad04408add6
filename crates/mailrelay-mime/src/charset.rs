//! Best-effort text decoding.
//!
//! Mail bodies arrive in whatever charset the sender's client picked, often
//! mislabelled. [`decode_text`] never fails: it tries UTF-8, then the
//! declared charset, then ISO-8859-1, and finally a lossy decode.

use encoding_rs::{Encoding, UTF_8};

/// Decodes bytes to a string.
///
/// Order of attempts:
/// 1. strict UTF-8, whatever the label says;
/// 2. the declared charset, if `encoding_rs` knows the label and the bytes
///    decode without errors;
/// 3. ISO-8859-1, when no charset was declared or the declared one is a
///    single-byte Western charset (every byte maps to a code point);
/// 4. lossy decoding with the declared charset (or UTF-8), replacing bad
///    sequences with U+FFFD.
#[must_use]
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    let declared = charset
        .map(|label| label.trim().trim_matches('"'))
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    if let Some(encoding) = declared
        && encoding != UTF_8
        && let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
    {
        return text.into_owned();
    }

    if declared.is_none_or(is_latin_family) {
        return decode_latin1(bytes);
    }

    let encoding = declared.unwrap_or(UTF_8);
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Maps each byte to the code point of the same value.
#[must_use]
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn is_latin_family(encoding: &'static Encoding) -> bool {
    encoding == UTF_8
        || encoding == encoding_rs::WINDOWS_1252
        || encoding == encoding_rs::ISO_8859_15
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_utf8_passthrough() {
        assert_eq!(decode_text("Församlingsbrev".as_bytes(), None), "Församlingsbrev");
        assert_eq!(
            decode_text("Församlingsbrev".as_bytes(), Some("utf-8")),
            "Församlingsbrev"
        );
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_latin1() {
        // "Församling" in ISO-8859-1, mislabelled as UTF-8.
        let bytes = b"F\xf6rsamling";
        assert_eq!(decode_text(bytes, Some("utf-8")), "Församling");
        assert_eq!(decode_text(bytes, None), "Församling");
    }

    #[test]
    fn test_utf8_wins_over_latin1_label() {
        let bytes = "Välkommen".as_bytes();
        assert_eq!(decode_text(bytes, Some("iso-8859-1")), "Välkommen");
        assert_eq!(decode_text(bytes, Some("windows-1252")), "Välkommen");
    }

    #[test]
    fn test_declared_charset_is_honoured() {
        // windows-1252 maps 0x80 to the euro sign.
        assert_eq!(decode_text(b"5 \x80", Some("windows-1252")), "5 €");
        assert_eq!(decode_text(b"\x82\xa0", Some("Shift_JIS")), "あ");
    }

    #[test]
    fn test_unknown_label_uses_latin1() {
        assert_eq!(decode_text(b"caf\xe9", Some("x-made-up")), "café");
    }

    #[test]
    fn test_lossy_for_broken_multibyte() {
        // A truncated Shift_JIS lead byte cannot decode strictly.
        let text = decode_text(b"ab\x82", Some("shift_jis"));
        assert!(text.starts_with("ab"));
        assert!(text.contains('\u{FFFD}'));
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256),
                               label in prop::option::of("[a-z0-9_-]{0,12}")) {
            let _ = decode_text(&bytes, label.as_deref());
        }

        #[test]
        fn valid_utf8_round_trips(text in "\\PC{0,64}") {
            prop_assert_eq!(decode_text(text.as_bytes(), None), text);
        }
    }
}
