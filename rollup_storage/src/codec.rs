//! Packed aggregate record stored in every bucket field.
//!
//! Wire layout (28 bytes, little-endian):
//!
//! ```text
//! +-----------+-----------+-----------+-----------+
//! | count u32 |  sum f64  |  min f64  |  max f64  |
//! +-----------+-----------+-----------+-----------+
//! ```
//!
//! The layout carries no version byte. A different layout needs a new key
//! namespace rather than an in-place migration.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Encoded size of one [`AggregateRecord`].
pub const RECORD_LEN: usize = 4 + 8 * 3;

/// Errors raised while decoding stored payloads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Payload is not exactly [`RECORD_LEN`] bytes.
    #[error("aggregate payload is {0} bytes, expected 28")]
    Length(usize),
    /// A stored record must have seen at least one value.
    #[error("aggregate payload has a zero count")]
    ZeroCount,
    /// `min` is greater than `max`.
    #[error("aggregate payload has min {min} > max {max}")]
    InvertedRange {
        /// Decoded minimum.
        min: f64,
        /// Decoded maximum.
        max: f64,
    },
    /// Hash field name is not a decimal sub-step index.
    #[error("bucket field {0:?} is not a sub-step index")]
    Field(String),
}

/// Running count/sum/min/max for one sub-step of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Number of values merged.
    pub count: u32,
    /// Sum of merged values.
    pub sum: f64,
    /// Smallest merged value.
    pub min: f64,
    /// Largest merged value.
    pub max: f64,
}

impl AggregateRecord {
    /// Record holding a single value.
    pub fn new(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    /// Fold one more value into the record.
    pub fn absorb(&mut self, value: f64) {
        self.count = self.count.saturating_add(1);
        self.sum += value;
        if self.min > value {
            self.min = value;
        }
        if self.max < value {
            self.max = value;
        }
    }

    /// Mean of all merged values.
    pub fn average(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Pack into the fixed wire layout.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.count);
        buf.put_f64_le(self.sum);
        buf.put_f64_le(self.min);
        buf.put_f64_le(self.max);
        out
    }

    /// Unpack from the fixed wire layout.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != RECORD_LEN {
            return Err(DecodeError::Length(data.len()));
        }
        let mut buf = data;
        let record = Self {
            count: buf.get_u32_le(),
            sum: buf.get_f64_le(),
            min: buf.get_f64_le(),
            max: buf.get_f64_le(),
        };
        if record.count == 0 {
            return Err(DecodeError::ZeroCount);
        }
        if record.min > record.max {
            return Err(DecodeError::InvertedRange {
                min: record.min,
                max: record.max,
            });
        }
        Ok(record)
    }
}

/// Apply one value to an optional existing payload and return the new payload.
///
/// This is the field-level body of the merge protocol. Every store strategy
/// goes through it so they produce identical bytes.
pub fn merge_payload(existing: Option<&[u8]>, value: f64) -> Result<[u8; RECORD_LEN], DecodeError> {
    let record = match existing {
        Some(data) => {
            let mut record = AggregateRecord::decode(data)?;
            record.absorb(value);
            record
        }
        None => AggregateRecord::new(value),
    };
    Ok(record.encode())
}
