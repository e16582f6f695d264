//! Bolt chunk framing.
//!
//! Each message travels as one or more chunks, each prefixed with a 16-bit
//! big-endian length, terminated by a zero-length chunk. A buffer may begin
//! with the 20-byte handshake preamble (magic plus version negotiation),
//! which passes through the relay untouched.

/// Handshake magic at the start of the very first client buffer.
pub const HANDSHAKE_MAGIC: u32 = 0x6060_b017;

/// Magic word plus four proposed protocol versions.
pub const HANDSHAKE_LEN: usize = 20;

/// Length of the handshake preamble at the start of `buf`, or zero.
pub fn preamble_len(buf: &[u8]) -> usize {
    if buf.len() >= HANDSHAKE_LEN
        && u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) == HANDSHAKE_MAGIC
    {
        HANDSHAKE_LEN
    } else {
        0
    }
}

/// Reassemble the chunked messages in `buf` (after any preamble).
///
/// Returns `None` when a chunk runs past the end of the buffer or the final
/// message is missing its terminator. Callers treat `None` as "not Bolt
/// traffic we can reason about" and forward the original bytes unchanged.
pub fn split_messages(buf: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut offset = preamble_len(buf);
    let mut messages = Vec::new();
    let mut chunks: Vec<&[u8]> = Vec::new();
    let mut saw_terminator = false;

    while offset + 2 <= buf.len() {
        let size = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
        offset += 2;
        if size == 0 {
            if !chunks.is_empty() {
                messages.push(chunks.concat());
                chunks.clear();
            }
            saw_terminator = true;
            continue;
        }
        if offset + size > buf.len() {
            return None;
        }
        chunks.push(&buf[offset..offset + size]);
        offset += size;
    }

    if !chunks.is_empty() || (!saw_terminator && !messages.is_empty()) {
        return None;
    }
    Some(messages)
}

/// Frame one message body: chunked at the u16 boundary, zero-chunk terminated.
pub fn frame_message(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 4);
    for chunk in message.chunks(u16::MAX as usize) {
        out.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&[0, 0]);
    out
}
