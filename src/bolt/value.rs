//! PackStream tagged-value encoding.
//!
//! # Responsibilities
//! - Decode a single Bolt structure from a reassembled message body
//! - Encode values with the exact width tiers the decoder accepts
//! - Render decoded values for structured logging (binary as hex)
//!
//! # Design Decisions
//! - Maps preserve key order so a re-encoded value is byte-faithful
//! - Decoding rejects (returns an error), it never panics on foreign bytes
//! - Encode thresholds mirror decode thresholds exactly: `encode(decode(x)) == x`

use thiserror::Error;

/// Nesting limit for untrusted input. A conforming driver never gets close.
const MAX_DEPTH: usize = 64;

/// A decoded PackStream value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Key order is the wire order.
    Map(Vec<(String, Value)>),
    Struct(Struct),
}

/// A Bolt structure: signature byte plus ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    pub signature: u8,
    pub fields: Vec<Value>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),
    #[error("unsupported marker byte 0x{0:02x}")]
    BadMarker(u8),
    #[error("map key is not a string")]
    BadMapKey,
    #[error("invalid UTF-8 in string value")]
    BadUtf8,
    #[error("trailing bytes after structure")]
    TrailingBytes,
    #[error("value nesting exceeds limit")]
    TooDeep,
    #[error("message does not start with a structure")]
    NotAStruct,
}

/// Decode one structure occupying the entire buffer.
///
/// Trailing bytes after the structure are a protocol violation and reject
/// the whole message, matching the tolerant-but-strict contract of the
/// relay: a rejected message is forwarded unchanged, never altered.
pub fn decode_message(buf: &[u8]) -> Result<Struct, DecodeError> {
    let mut r = Reader { buf, pos: 0 };
    let value = r.read_value(0)?;
    if r.pos != buf.len() {
        return Err(DecodeError::TrailingBytes);
    }
    match value {
        Value::Struct(s) => Ok(s),
        _ => Err(DecodeError::NotAStruct),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::Truncated(self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        let marker = self.u8()?;
        match marker {
            // Tiny positive int.
            0x00..=0x7f => Ok(Value::Int(marker as i64)),
            // Tiny negative int (-16..=-1).
            0xf0..=0xff => Ok(Value::Int(marker as i8 as i64)),
            // Tiny string.
            0x80..=0x8f => self.read_string((marker & 0x0f) as usize),
            // Tiny list.
            0x90..=0x9f => self.read_list((marker & 0x0f) as usize, depth),
            // Tiny map.
            0xa0..=0xaf => self.read_map((marker & 0x0f) as usize, depth),
            // Structure.
            0xb0..=0xbf => {
                let count = (marker & 0x0f) as usize;
                let signature = self.u8()?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(self.read_value(depth + 1)?);
                }
                Ok(Value::Struct(Struct { signature, fields }))
            }
            0xc0 => Ok(Value::Null),
            0xc1 => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(Value::Float(f64::from_be_bytes(raw)))
            }
            0xc2 => Ok(Value::Bool(false)),
            0xc3 => Ok(Value::Bool(true)),
            0xc8 => Ok(Value::Int(self.u8()? as i8 as i64)),
            0xc9 => Ok(Value::Int(self.u16()? as i16 as i64)),
            0xca => Ok(Value::Int(self.u32()? as i32 as i64)),
            0xcb => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(Value::Int(i64::from_be_bytes(raw)))
            }
            0xcc => {
                let n = self.u8()? as usize;
                Ok(Value::Bytes(self.take(n)?.to_vec()))
            }
            0xcd => {
                let n = self.u16()? as usize;
                Ok(Value::Bytes(self.take(n)?.to_vec()))
            }
            0xce => {
                let n = self.u32()? as usize;
                Ok(Value::Bytes(self.take(n)?.to_vec()))
            }
            0xd0 => {
                let n = self.u8()? as usize;
                self.read_string(n)
            }
            0xd1 => {
                let n = self.u16()? as usize;
                self.read_string(n)
            }
            0xd2 => {
                let n = self.u32()? as usize;
                self.read_string(n)
            }
            0xd4 => {
                let n = self.u8()? as usize;
                self.read_list(n, depth)
            }
            0xd5 => {
                let n = self.u16()? as usize;
                self.read_list(n, depth)
            }
            0xd6 => {
                let n = self.u32()? as usize;
                self.read_list(n, depth)
            }
            0xd8 => {
                let n = self.u8()? as usize;
                self.read_map(n, depth)
            }
            0xd9 => {
                let n = self.u16()? as usize;
                self.read_map(n, depth)
            }
            0xda => {
                let n = self.u32()? as usize;
                self.read_map(n, depth)
            }
            other => Err(DecodeError::BadMarker(other)),
        }
    }

    fn read_string(&mut self, len: usize) -> Result<Value, DecodeError> {
        let raw = self.take(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| DecodeError::BadUtf8)?;
        Ok(Value::String(s.to_string()))
    }

    fn read_list(&mut self, count: usize, depth: usize) -> Result<Value, DecodeError> {
        let mut items = Vec::new();
        for _ in 0..count {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(Value::List(items))
    }

    fn read_map(&mut self, count: usize, depth: usize) -> Result<Value, DecodeError> {
        let mut entries = Vec::new();
        for _ in 0..count {
            let key = match self.read_value(depth + 1)? {
                Value::String(s) => s,
                _ => return Err(DecodeError::BadMapKey),
            };
            let value = self.read_value(depth + 1)?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

/// Encode a structure: marker with field count, signature, then fields.
pub fn encode_struct(signature: u8, fields: &[Value]) -> Vec<u8> {
    let mut out = vec![0xb0 + (fields.len() as u8 & 0x0f), signature];
    for field in fields {
        encode_value(field, &mut out);
    }
    out
}

pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xc0),
        Value::Bool(false) => out.push(0xc2),
        Value::Bool(true) => out.push(0xc3),
        Value::Float(f) => {
            out.push(0xc1);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Int(v) => encode_int(*v, out),
        Value::String(s) => encode_string(s, out),
        Value::Bytes(b) => {
            match b.len() {
                0..=0xff => {
                    out.push(0xcc);
                    out.push(b.len() as u8);
                }
                0x100..=0xffff => {
                    out.push(0xcd);
                    out.extend_from_slice(&(b.len() as u16).to_be_bytes());
                }
                _ => {
                    out.push(0xce);
                    out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                }
            }
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            match items.len() {
                0..=0x0f => out.push(0x90 + items.len() as u8),
                0x10..=0xff => {
                    out.push(0xd4);
                    out.push(items.len() as u8);
                }
                0x100..=0xffff => {
                    out.push(0xd5);
                    out.extend_from_slice(&(items.len() as u16).to_be_bytes());
                }
                _ => {
                    out.push(0xd6);
                    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                }
            }
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Map(entries) => {
            match entries.len() {
                0..=0x0f => out.push(0xa0 + entries.len() as u8),
                0x10..=0xff => {
                    out.push(0xd8);
                    out.push(entries.len() as u8);
                }
                0x100..=0xffff => {
                    out.push(0xd9);
                    out.extend_from_slice(&(entries.len() as u16).to_be_bytes());
                }
                _ => {
                    out.push(0xda);
                    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                }
            }
            for (key, entry) in entries {
                encode_string(key, out);
                encode_value(entry, out);
            }
        }
        Value::Struct(s) => {
            out.extend_from_slice(&encode_struct(s.signature, &s.fields));
        }
    }
}

fn encode_int(v: i64, out: &mut Vec<u8>) {
    if (-16..=127).contains(&v) {
        out.push(v as i8 as u8);
    } else if (-128..=-17).contains(&v) {
        out.push(0xc8);
        out.push(v as i8 as u8);
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
        out.push(0xc9);
        out.extend_from_slice(&(v as i16).to_be_bytes());
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
        out.push(0xca);
        out.extend_from_slice(&(v as i32).to_be_bytes());
    } else {
        out.push(0xcb);
        out.extend_from_slice(&v.to_be_bytes());
    }
}

fn encode_string(s: &str, out: &mut Vec<u8>) {
    let payload = s.as_bytes();
    match payload.len() {
        0..=0x0f => out.push(0x80 + payload.len() as u8),
        0x10..=0xff => {
            out.push(0xd0);
            out.push(payload.len() as u8);
        }
        0x100..=0xffff => {
            out.push(0xd1);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        _ => {
            out.push(0xd2);
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        }
    }
    out.extend_from_slice(payload);
}

impl Value {
    /// Render for structured logs: byte arrays become hex strings, nested
    /// structures are flattened to their fields.
    pub fn to_log_value(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
                serde_json::Value::String(hex)
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_log_value).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_log_value()))
                    .collect(),
            ),
            Value::Struct(s) => serde_json::Value::Array(
                s.fields.iter().map(Value::to_log_value).collect(),
            ),
        }
    }
}
