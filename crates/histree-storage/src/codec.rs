//! Interval value codecs.
//!
//! The tree stores an opaque payload with every interval. A codec is passed
//! to the tree at construction and decides how that payload is laid out in
//! a node block. Encoding must be deterministic and decoding must consume
//! exactly the bytes that `size_on_disk` reported.

use bytes::{Buf, BufMut, BytesMut};
use histree_common::{HistreeError, Result};
use serde::{Deserialize, Serialize};

/// Encodes and decodes the payload stored with each interval.
pub trait IntervalCodec: Send + Sync {
    /// The payload type.
    type Value: Clone + std::fmt::Debug + PartialEq + Send + Sync;

    /// Returns the number of bytes `encode` writes for `value`.
    fn size_on_disk(&self, value: &Self::Value) -> usize;

    /// Appends the encoded value to `buf`.
    fn encode(&self, value: &Self::Value, buf: &mut BytesMut);

    /// Decodes one value, advancing `buf` past it.
    ///
    /// Malformed or short input is a `Decode` error.
    fn decode(&self, buf: &mut &[u8]) -> Result<Self::Value>;
}

/// Fails with `Decode` unless `buf` holds at least `needed` bytes.
#[inline]
pub(crate) fn ensure_remaining(buf: &[u8], needed: usize, what: &str) -> Result<()> {
    if buf.len() < needed {
        return Err(HistreeError::Decode(format!(
            "{} needs {} bytes, {} left",
            what,
            needed,
            buf.len()
        )));
    }
    Ok(())
}

/// Fixed-size codec for plain `i64` payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl IntervalCodec for I64Codec {
    type Value = i64;

    fn size_on_disk(&self, _value: &i64) -> usize {
        8
    }

    fn encode(&self, value: &i64, buf: &mut BytesMut) {
        buf.put_i64_le(*value);
    }

    fn decode(&self, buf: &mut &[u8]) -> Result<i64> {
        ensure_remaining(buf, 8, "i64 value")?;
        Ok(buf.get_i64_le())
    }
}

/// Value of a state attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    /// No value.
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Double precision float.
    Double(f64),
    /// UTF-8 string.
    Str(String),
}

impl StateValue {
    const TAG_NULL: u8 = 0;
    const TAG_INT: u8 = 1;
    const TAG_LONG: u8 = 2;
    const TAG_DOUBLE: u8 = 3;
    const TAG_STR: u8 = 4;

    /// Longest string that can be stored, in bytes.
    pub const MAX_STR_LEN: usize = u16::MAX as usize;

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    fn tag(&self) -> u8 {
        match self {
            StateValue::Null => Self::TAG_NULL,
            StateValue::Int(_) => Self::TAG_INT,
            StateValue::Long(_) => Self::TAG_LONG,
            StateValue::Double(_) => Self::TAG_DOUBLE,
            StateValue::Str(_) => Self::TAG_STR,
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::Long(v) => write!(f, "{}L", v),
            StateValue::Double(v) => write!(f, "{}", v),
            StateValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Codec for [`StateValue`] payloads.
///
/// Layout: one type byte followed by the value. Strings carry a u16 byte
/// length; longer strings are cut at a character boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateValueCodec;

impl StateValueCodec {
    fn stored_str(s: &str) -> &str {
        if s.len() <= StateValue::MAX_STR_LEN {
            return s;
        }
        let mut end = StateValue::MAX_STR_LEN;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

impl IntervalCodec for StateValueCodec {
    type Value = StateValue;

    fn size_on_disk(&self, value: &StateValue) -> usize {
        1 + match value {
            StateValue::Null => 0,
            StateValue::Int(_) => 4,
            StateValue::Long(_) | StateValue::Double(_) => 8,
            StateValue::Str(s) => 2 + Self::stored_str(s).len(),
        }
    }

    fn encode(&self, value: &StateValue, buf: &mut BytesMut) {
        buf.put_u8(value.tag());
        match value {
            StateValue::Null => {}
            StateValue::Int(v) => buf.put_i32_le(*v),
            StateValue::Long(v) => buf.put_i64_le(*v),
            StateValue::Double(v) => buf.put_f64_le(*v),
            StateValue::Str(s) => {
                let stored = Self::stored_str(s);
                buf.put_u16_le(stored.len() as u16);
                buf.put_slice(stored.as_bytes());
            }
        }
    }

    fn decode(&self, buf: &mut &[u8]) -> Result<StateValue> {
        ensure_remaining(buf, 1, "state value tag")?;
        let tag = buf.get_u8();
        match tag {
            StateValue::TAG_NULL => Ok(StateValue::Null),
            StateValue::TAG_INT => {
                ensure_remaining(buf, 4, "int value")?;
                Ok(StateValue::Int(buf.get_i32_le()))
            }
            StateValue::TAG_LONG => {
                ensure_remaining(buf, 8, "long value")?;
                Ok(StateValue::Long(buf.get_i64_le()))
            }
            StateValue::TAG_DOUBLE => {
                ensure_remaining(buf, 8, "double value")?;
                Ok(StateValue::Double(buf.get_f64_le()))
            }
            StateValue::TAG_STR => {
                ensure_remaining(buf, 2, "string length")?;
                let len = buf.get_u16_le() as usize;
                ensure_remaining(buf, len, "string value")?;
                let s = std::str::from_utf8(&buf[..len])
                    .map_err(|e| HistreeError::Decode(format!("invalid UTF-8 string: {}", e)))?
                    .to_string();
                buf.advance(len);
                Ok(StateValue::Str(s))
            }
            _ => Err(HistreeError::Decode(format!(
                "invalid state value tag: {}",
                tag
            ))),
        }
    }
}
