//! Reference waveform uploaded before streaming starts.
//!
//! The waveform is one full revolution of a complex sinusoid at near
//! full-scale 32-bit amplitude. The firmware compares against these exact
//! values, so rounding is `floor(x + 0.5)` and never round-half-even.

use bytes::BufMut;
use std::f64::consts::PI;

/// Fixed-point scale of the I/Q components (close to `i32::MAX`).
pub const AMPLITUDE: f64 = 2.1e9;

/// Size of one sample record on the wire.
pub const RECORD_BYTES: usize = 16;

/// One IQ sample as the firmware lays it out: I, Q and two reserved words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleRecord {
    pub i: i32,
    pub q: i32,
    pub reserved0: i32,
    pub reserved1: i32,
}

impl SampleRecord {
    pub fn new(i: i32, q: i32) -> Self {
        Self {
            i,
            q,
            ..Default::default()
        }
    }

    /// Append the little-endian wire form to `buf`.
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.i);
        buf.put_i32_le(self.q);
        buf.put_i32_le(self.reserved0);
        buf.put_i32_le(self.reserved1);
    }

    /// Parse a record from exactly [`RECORD_BYTES`] bytes.
    pub fn from_le_bytes(raw: &[u8; RECORD_BYTES]) -> Self {
        let word = |n: usize| i32::from_le_bytes([raw[n], raw[n + 1], raw[n + 2], raw[n + 3]]);
        Self {
            i: word(0),
            q: word(4),
            reserved0: word(8),
            reserved1: word(12),
        }
    }
}

fn round_half_up(x: f64) -> i32 {
    (x + 0.5).floor() as i32
}

/// Generate `size` records tracing one revolution of the unit circle at [`AMPLITUDE`].
pub fn generate(size: usize) -> Vec<SampleRecord> {
    (0..size)
        .map(|i| {
            let theta = 2.0 * PI * i as f64 / size as f64;
            SampleRecord::new(
                round_half_up(AMPLITUDE * theta.cos()),
                round_half_up(AMPLITUDE * theta.sin()),
            )
        })
        .collect()
}

/// Byte length of a payload carrying `size` records, saturating at `usize::MAX`.
pub fn payload_bytes(size: usize) -> usize {
    size.saturating_mul(RECORD_BYTES)
}
