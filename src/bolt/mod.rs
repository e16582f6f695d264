//! Bolt wire codec.
//!
//! # Data Flow
//! ```text
//! WebSocket binary frame
//!     → chunk.rs (reassemble chunked messages, skip handshake preamble)
//!     → value.rs (PackStream decode/encode)
//!     → extract_run_messages (inspection) / inject_auth (rewrite)
//! ```
//!
//! # Design Decisions
//! - Consumed only by the Bolt-flavored WebSocket handler; stateless, no locks
//! - Everything here is tolerant: malformed input means "forward unchanged",
//!   never an error surfaced to the relay
//! - A rewritten buffer is re-framed with recomputed chunk sizes so the
//!   backend cannot distinguish it from an original

pub mod chunk;
pub mod value;

use serde::Deserialize;

pub use value::{decode_message, encode_struct, DecodeError, Struct, Value};

/// Signature of a RUN request (query execution).
pub const SIG_RUN: u8 = 0x10;

/// Signature of the credential-bearing authentication message.
pub const SIG_AUTH: u8 = 0x6a;

/// Operator-held credentials substituted into client authentication frames.
#[derive(Debug, Clone, Deserialize)]
pub struct BoltAuth {
    pub scheme: String,
    pub principal: String,
    pub credentials: String,
}

impl Default for BoltAuth {
    fn default() -> Self {
        Self {
            scheme: "basic".to_string(),
            principal: "neo4j".to_string(),
            credentials: String::new(),
        }
    }
}

/// A decoded RUN request: the Cypher text and its parameter map.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMessage {
    pub query: String,
    pub params: Value,
}

/// Pull every RUN message out of a chunked buffer.
///
/// Tolerant by contract: any framing or decode failure yields an empty list
/// so the relay can keep forwarding the original bytes.
pub fn extract_run_messages(buf: &[u8]) -> Vec<RunMessage> {
    let Some(messages) = chunk::split_messages(buf) else {
        return Vec::new();
    };
    let mut runs = Vec::new();
    for message in messages {
        let Ok(decoded) = decode_message(&message) else {
            continue;
        };
        if decoded.signature != SIG_RUN || decoded.fields.len() < 2 {
            continue;
        }
        let mut fields = decoded.fields.into_iter();
        let Some(Value::String(query)) = fields.next() else {
            continue;
        };
        let params = fields.next().unwrap_or(Value::Null);
        runs.push(RunMessage { query, params });
    }
    runs
}

/// True when the message is a single-field struct carrying credentials.
fn is_auth_message(message: &[u8]) -> bool {
    message.len() >= 2
        && message[0] & 0xf0 == 0xb0
        && message[0] & 0x0f == 1
        && message[1] == SIG_AUTH
}

/// Replace client credentials with the operator-held ones.
///
/// Returns a fully re-framed buffer only when at least one authentication
/// message was found and rewritten; `None` signals "forward unchanged".
/// Messages other than the rewritten one survive byte-identical, and a
/// handshake preamble is carried over untouched.
pub fn inject_auth(buf: &[u8], auth: &BoltAuth) -> Option<Vec<u8>> {
    let messages = chunk::split_messages(buf)?;

    let mut changed = false;
    let rewritten: Vec<Vec<u8>> = messages
        .into_iter()
        .map(|message| {
            if is_auth_message(&message) {
                changed = true;
                let map = Value::Map(vec![
                    ("scheme".to_string(), Value::String(auth.scheme.clone())),
                    ("principal".to_string(), Value::String(auth.principal.clone())),
                    ("credentials".to_string(), Value::String(auth.credentials.clone())),
                ]);
                encode_struct(SIG_AUTH, &[map])
            } else {
                message
            }
        })
        .collect();

    if !changed {
        return None;
    }

    let preamble = &buf[..chunk::preamble_len(buf)];
    let mut out = preamble.to_vec();
    for message in &rewritten {
        out.extend(chunk::frame_message(message));
    }
    Some(out)
}
