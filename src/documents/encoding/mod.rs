#[cfg(test)]
mod tests;

use encoding_rs::{Encoding, UTF_8};
use tracing::debug;

/// Bytes sampled from the start of a file for detection
pub const DETECTION_SAMPLE_BYTES: usize = 10_000;
/// Minimum detector confidence before its guess is trusted
pub const CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Guess the character encoding of `bytes`, falling back to UTF-8 when the
/// detector is unsure
#[inline]
pub fn detect_encoding(bytes: &[u8]) -> String {
    let sample = bytes[..bytes.len().min(DETECTION_SAMPLE_BYTES)].to_vec();
    if sample.is_empty() {
        return DEFAULT_ENCODING.to_string();
    }

    let (charset, confidence, _language) = chardet::detect(&sample);
    debug!(
        "Detected encoding {:?} with confidence {:.2}",
        charset, confidence
    );

    if confidence > CONFIDENCE_THRESHOLD && !charset.is_empty() {
        charset
    } else {
        DEFAULT_ENCODING.to_string()
    }
}

/// Decode `bytes` using the encoding named by `label`, substituting
/// replacement characters for malformed sequences. Unknown labels decode as
/// UTF-8.
#[inline]
pub fn decode_lossy(bytes: &[u8], label: &str) -> String {
    let encoding = resolve_encoding(label);
    let (text, actual, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!(
            "Decoding as {} replaced malformed sequences",
            actual.name()
        );
    }
    text.into_owned()
}

fn resolve_encoding(label: &str) -> &'static Encoding {
    let normalized = chardet::charset2encoding(&label.to_string()).to_string();
    Encoding::for_label(normalized.as_bytes())
        .or_else(|| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8)
}
