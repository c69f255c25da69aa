//! Base64 encoding for text-framed frame delivery.
//!
//! Used when the server is configured with
//! [`FrameEncoding::Base64Text`](crate::domain::FrameEncoding::Base64Text):
//! the encoded image is sent as a text WebSocket message, which must be valid
//! UTF-8, so the bytes are base64-encoded (RFC 4648 §4, with padding) once per
//! broadcast and the resulting string is shared by every session.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encodes `data` as standard base64 with `=` padding.
pub fn base64_encode(data: &[u8]) -> String {
    // Every 3 input bytes become 4 output characters, rounded up.
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied().unwrap_or(0);
        let b2 = chunk.get(2).copied().unwrap_or(0);
        let group = (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2);

        out.push(ALPHABET[(group >> 18) as usize & 0x3F] as char);
        out.push(ALPHABET[(group >> 12) as usize & 0x3F] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(group >> 6) as usize & 0x3F] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[group as usize & 0x3F] as char
        } else {
            '='
        });
    }

    out
}
