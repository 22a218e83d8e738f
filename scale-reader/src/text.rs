//! Chunk decoding
//!
//! Scales send ASCII readings, but nothing on the wire guarantees it. Chunks
//! are decoded as UTF-8 with invalid sequences replaced, never rejected.

/// Decodes one received chunk and strips surrounding whitespace, including
/// the CR/LF terminators and a stray byte order mark.
pub fn decode_chunk(chunk: &[u8]) -> String {
    String::from_utf8_lossy(chunk)
        .trim_matches(is_trimmed)
        .to_string()
}

/// Unicode white space plus BOM, minus NEL (U+0085).
fn is_trimmed(c: char) -> bool {
    (c.is_whitespace() && c != '\u{85}') || c == '\u{feff}'
}
