use super::*;

#[test]
fn empty_input_uses_default() {
    assert_eq!(detect_encoding(&[]), DEFAULT_ENCODING);
}

#[test]
fn utf8_text_is_detected() {
    let text = "Élégant café, crème brûlée, naïve façade, jalapeño piñata, déjà vu. ".repeat(20);
    let label = detect_encoding(text.as_bytes());
    let label = label.to_lowercase();
    assert!(label == "utf-8" || label == "utf8", "got {}", label);
    assert_eq!(decode_lossy(text.as_bytes(), &label), text);
}

#[test]
fn ascii_text_round_trips() {
    let text = "The capital of Freedonia is Lostcity.";
    let label = detect_encoding(text.as_bytes());
    assert_eq!(decode_lossy(text.as_bytes(), &label), text);
}

#[test]
fn explicit_legacy_label_decodes() {
    let bytes = b"caf\xe9 cr\xe8me";
    assert_eq!(decode_lossy(bytes, "windows-1252"), "café crème");
    assert_eq!(decode_lossy(bytes, "ISO-8859-1"), "café crème");
}

#[test]
fn malformed_bytes_are_replaced() {
    let bytes = b"valid \xff\xfe tail";
    let decoded = decode_lossy(bytes, "utf-8");
    assert!(decoded.starts_with("valid "));
    assert!(decoded.ends_with(" tail"));
    assert!(decoded.contains('\u{FFFD}'));
}

#[test]
fn unknown_label_falls_back_to_utf8() {
    assert_eq!(decode_lossy("héllo".as_bytes(), "not-a-charset"), "héllo");
}

#[test]
fn only_the_sample_is_inspected() {
    let mut bytes = vec![b'a'; DETECTION_SAMPLE_BYTES];
    bytes.extend_from_slice(b"\xff\xfe\xfd");
    // Trailing garbage beyond the sample cannot sway the guess
    let label = detect_encoding(&bytes);
    assert!(!label.is_empty());
}
