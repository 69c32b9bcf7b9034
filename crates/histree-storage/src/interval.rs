//! Attribute intervals stored in the tree.

use crate::codec::{ensure_remaining, IntervalCodec};
use bytes::{Buf, BufMut, BytesMut};
use histree_common::{HistreeError, Result, TimeRange};

/// A `(quark, start, end, value)` tuple describing one state of an attribute.
///
/// Encoded layout:
/// - start: 8 bytes
/// - end: 8 bytes
/// - quark: 4 bytes
/// - value: codec defined
#[derive(Debug, Clone, PartialEq)]
pub struct Interval<V> {
    quark: u32,
    start: i64,
    end: i64,
    value: V,
}

impl<V> Interval<V> {
    /// Size of the fixed part of an encoded interval.
    pub const FIXED_SIZE: usize = 8 + 8 + 4;

    /// Creates an interval, rejecting `start > end`.
    pub fn new(quark: u32, start: i64, end: i64, value: V) -> Result<Self> {
        if start > end {
            return Err(HistreeError::InvalidInterval { start, end });
        }
        Ok(Self {
            quark,
            start,
            end,
            value,
        })
    }

    /// Returns the attribute handle.
    #[inline]
    pub fn quark(&self) -> u32 {
        self.quark
    }

    /// Returns the first instant.
    #[inline]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Returns the last instant.
    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Returns the payload.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the interval and returns the payload.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns true if `t` lies within the interval.
    #[inline]
    pub fn contains(&self, t: i64) -> bool {
        self.start <= t && t <= self.end
    }

    /// Returns true if the interval shares an instant with `range`.
    #[inline]
    pub fn intersects(&self, range: &TimeRange) -> bool {
        range.intersects(self.start, self.end)
    }

    /// Returns the encoded size under `codec`.
    pub fn size_on_disk<C>(&self, codec: &C) -> usize
    where
        C: IntervalCodec<Value = V>,
    {
        Self::FIXED_SIZE + codec.size_on_disk(&self.value)
    }

    /// Appends the encoded interval to `buf`.
    pub fn encode<C>(&self, codec: &C, buf: &mut BytesMut)
    where
        C: IntervalCodec<Value = V>,
    {
        buf.put_i64_le(self.start);
        buf.put_i64_le(self.end);
        buf.put_u32_le(self.quark);
        codec.encode(&self.value, buf);
    }

    /// Decodes one interval, advancing `buf` past it.
    pub fn decode<C>(codec: &C, buf: &mut &[u8]) -> Result<Self>
    where
        C: IntervalCodec<Value = V>,
    {
        ensure_remaining(buf, Self::FIXED_SIZE, "interval")?;
        let start = buf.get_i64_le();
        let end = buf.get_i64_le();
        let quark = buf.get_u32_le();
        let value = codec.decode(buf)?;

        if start > end {
            return Err(HistreeError::Decode(format!(
                "interval start {} after end {}",
                start, end
            )));
        }

        Ok(Self {
            quark,
            start,
            end,
            value,
        })
    }
}

impl<V: std::fmt::Display> std::fmt::Display for Interval<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}], attribute = {}, value = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}
