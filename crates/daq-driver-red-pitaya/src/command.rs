//! Tagged 32-bit command words for the radar streaming firmware.
//!
//! # Word layout
//!
//! ```text
//!  31    28 27                                   0
//! +--------+--------------------------------------+
//! |  tag   |                value                 |
//! +--------+--------------------------------------+
//! ```
//!
//! Tag `1` carries the sample rate, tag `2` the payload length in bytes and
//! tag `3` is the trigger. A word with no tag bits set is a bare opcode;
//! `20` means "configure and upload". Words go on the wire little-endian.

use crate::error::CommandError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Number of value bits below the tag nibble.
pub const VALUE_BITS: u32 = 28;

/// Largest value that fits below the tag nibble.
pub const MAX_VALUE: u32 = (1 << VALUE_BITS) - 1;

/// Opcode announcing a configure-and-upload sequence.
pub const OPCODE_CONFIGURE: u32 = 20;

/// Size of one command word on the wire.
pub const WORD_BYTES: usize = 4;

/// Size of the encoded configure command.
pub const CONFIGURE_BYTES: usize = 3 * WORD_BYTES;

/// Size of the encoded trigger command.
pub const TRIGGER_BYTES: usize = WORD_BYTES;

/// Tag nibble of a tagged command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    SampleRate = 1,
    PayloadLength = 2,
    Trigger = 3,
}

impl Tag {
    fn from_nibble(nibble: u8, word: u32) -> Result<Self, CommandError> {
        match nibble {
            1 => Ok(Tag::SampleRate),
            2 => Ok(Tag::PayloadLength),
            3 => Ok(Tag::Trigger),
            tag => Err(CommandError::UnknownTag { tag, word }),
        }
    }
}

/// One control word, either a bare opcode or a tag with a 28-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandWord {
    Opcode(u32),
    Tagged { tag: Tag, value: u32 },
}

impl CommandWord {
    pub fn tagged(tag: Tag, value: u32) -> Self {
        CommandWord::Tagged { tag, value }
    }

    /// Encode into the raw word, refusing values that would spill into the tag.
    pub fn encode(&self) -> Result<u32, CommandError> {
        let (tag_bits, value) = match *self {
            CommandWord::Opcode(op) => (0, op),
            CommandWord::Tagged { tag, value } => ((tag as u32) << VALUE_BITS, value),
        };
        if value > MAX_VALUE {
            return Err(CommandError::ValueOutOfRange {
                value,
                max: MAX_VALUE,
            });
        }
        Ok(tag_bits | value)
    }

    pub fn decode(word: u32) -> Result<Self, CommandError> {
        let nibble = (word >> VALUE_BITS) as u8;
        let value = word & MAX_VALUE;
        if nibble == 0 {
            return Ok(CommandWord::Opcode(value));
        }
        Ok(CommandWord::Tagged {
            tag: Tag::from_nibble(nibble, word)?,
            value,
        })
    }
}

/// A complete command message as the firmware dispatches it.
///
/// The firmware tells the two apart by length: configure is three words,
/// trigger is a single word sent on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Configure {
        sample_rate_hz: u32,
        payload_bytes: u32,
    },
    Trigger,
}

impl Command {
    pub fn words(&self) -> Vec<CommandWord> {
        match *self {
            Command::Configure {
                sample_rate_hz,
                payload_bytes,
            } => vec![
                CommandWord::Opcode(OPCODE_CONFIGURE),
                CommandWord::tagged(Tag::SampleRate, sample_rate_hz),
                CommandWord::tagged(Tag::PayloadLength, payload_bytes),
            ],
            Command::Trigger => vec![CommandWord::tagged(Tag::Trigger, 0)],
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Configure { .. } => CONFIGURE_BYTES,
            Command::Trigger => TRIGGER_BYTES,
        }
    }

    /// Serialize every word, failing before anything is produced if one is out of range.
    pub fn encode(&self) -> Result<Bytes, CommandError> {
        let words = self.words();
        let mut buf = BytesMut::with_capacity(words.len() * WORD_BYTES);
        for word in &words {
            buf.put_u32_le(word.encode()?);
        }
        Ok(buf.freeze())
    }

    /// Parse a configure message (exactly three words).
    pub fn decode_configure(mut raw: &[u8]) -> Result<Self, CommandError> {
        if raw.len() != CONFIGURE_BYTES {
            return Err(CommandError::Malformed(format!(
                "configure is {} bytes, got {}",
                CONFIGURE_BYTES,
                raw.len()
            )));
        }
        let op = CommandWord::decode(raw.get_u32_le())?;
        let rate = CommandWord::decode(raw.get_u32_le())?;
        let len = CommandWord::decode(raw.get_u32_le())?;
        match (op, rate, len) {
            (
                CommandWord::Opcode(OPCODE_CONFIGURE),
                CommandWord::Tagged {
                    tag: Tag::SampleRate,
                    value: sample_rate_hz,
                },
                CommandWord::Tagged {
                    tag: Tag::PayloadLength,
                    value: payload_bytes,
                },
            ) => Ok(Command::Configure {
                sample_rate_hz,
                payload_bytes,
            }),
            other => Err(CommandError::Malformed(format!(
                "unexpected configure words {:?}",
                other
            ))),
        }
    }

    /// Parse a trigger message (exactly one word).
    pub fn decode_trigger(mut raw: &[u8]) -> Result<Self, CommandError> {
        if raw.len() != TRIGGER_BYTES {
            return Err(CommandError::Malformed(format!(
                "trigger is {} bytes, got {}",
                TRIGGER_BYTES,
                raw.len()
            )));
        }
        match CommandWord::decode(raw.get_u32_le())? {
            CommandWord::Tagged {
                tag: Tag::Trigger,
                value: 0,
            } => Ok(Command::Trigger),
            other => Err(CommandError::Malformed(format!(
                "expected trigger, got {:?}",
                other
            ))),
        }
    }
}
