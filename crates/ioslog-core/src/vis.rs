//! Decoder for the 7-bit-safe "vis" escaping used by legacy system logs.
//!
//! The OS syslog relay encodes arbitrary bytes as printable ASCII so the
//! transport stays 7-bit clean. Three escape forms exist, each four bytes
//! long starting with a backslash:
//!
//! - `\M^B` — meta + control: emit `(B & 0x7f) + 0x40`
//! - `\M-B` — meta: emit `B | 0x80`
//! - `\DDD` — octal triplet: emit `(D1 & 0x3) << 6 | (D2 & 0x7) << 3 | (D3 & 0x7)`
//!
//! Anything else after a backslash is not an escape and is copied through
//! verbatim. Multi-byte UTF-8 sequences arrive as runs of escapes, e.g.
//! `\M-b\M^@\M^T` decodes to the bytes `E2 80 94` (an em dash).

const BACKSLASH: u8 = b'\\';

/// Decode vis escapes in a syslog line back into UTF-8 text.
///
/// Fails soft: if the decoded bytes are not valid UTF-8 the original line is
/// returned unchanged. Pure and idempotence-safe for escape-free input.
pub fn decode(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        // A backslash too close to the end of the line cannot start a
        // four-byte escape; copy it literally.
        if bytes[i] != BACKSLASH || i + 4 > bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let (b1, b2, b3) = (bytes[i + 1], bytes[i + 2], bytes[i + 3]);
        if b1 == b'M' && b2 == b'^' {
            out.push((b3 & 0x7f) + 0x40);
        } else if b1 == b'M' && b2 == b'-' {
            out.push(b3 | 0x80);
        } else if b1.is_ascii_digit() && b2.is_ascii_digit() && b3.is_ascii_digit() {
            out.push((b1 & 0x3) << 6 | (b2 & 0x7) << 3 | (b3 & 0x7));
        } else {
            // Unrecognized escape: copy all four bytes through unchanged.
            out.extend_from_slice(&bytes[i..i + 4]);
        }
        i += 4;
    }

    String::from_utf8(out).unwrap_or_else(|_| line.to_string())
}
