//! Frame-scoped uniform arena
//!
//! Uniform updates are recorded at submit time as an opcode word followed by
//! the raw payload, and replayed by the render context at flush:
//!
//! ```text
//! 31   28 27          16 15     8 7      0
//! +------+--------------+--------+--------+----------------------+
//! | type |   location   |  size  | count  | payload (size*count) |
//! +------+--------------+--------+--------+----------------------+
//! ```
//!
//! The backing store is allocated once and never grows; the cursor is reset
//! after every flush.

use std::ops::Range;

use crate::render::resources::UniformType;
use crate::render::{RenderError, RenderResult};

const TYPE_SHIFT: u32 = 28;
const LOCATION_SHIFT: u32 = 16;
const SIZE_SHIFT: u32 = 8;
const LOCATION_MASK: u32 = 0x0FFF;
const BYTE_MASK: u32 = 0xFF;

/// Size of an encoded opcode in bytes
pub const OPCODE_BYTES: usize = 4;

/// Decoded uniform update header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformOpcode {
    /// Value type
    pub kind: UniformType,
    /// Location in the program (12 bits)
    pub location: u16,
    /// Element size in bytes
    pub size: u8,
    /// Element count
    pub count: u8,
}

impl UniformOpcode {
    /// Header for `count` elements of `kind` at `location`
    pub const fn new(kind: UniformType, location: u16, count: u8) -> Self {
        Self {
            kind,
            location,
            size: kind.size(),
            count,
        }
    }

    /// Payload bytes following this header
    pub const fn payload_len(&self) -> usize {
        self.size as usize * self.count as usize
    }

    /// Pack into the 32-bit opcode word
    pub const fn encode(&self) -> u32 {
        ((self.kind as u32) << TYPE_SHIFT)
            | ((self.location as u32 & LOCATION_MASK) << LOCATION_SHIFT)
            | ((self.size as u32) << SIZE_SHIFT)
            | self.count as u32
    }

    /// Unpack an opcode word; `None` for an unknown type code
    pub const fn decode(word: u32) -> Option<Self> {
        let Some(kind) = UniformType::from_code(word >> TYPE_SHIFT) else {
            return None;
        };
        Some(Self {
            kind,
            location: ((word >> LOCATION_SHIFT) & LOCATION_MASK) as u16,
            size: ((word >> SIZE_SHIFT) & BYTE_MASK) as u8,
            count: (word & BYTE_MASK) as u8,
        })
    }
}

/// One replayable uniform update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformRecord<'a> {
    /// Header
    pub opcode: UniformOpcode,
    /// Raw payload
    pub payload: &'a [u8],
}

/// Append-only byte store for one frame of uniform updates
#[derive(Debug)]
pub struct UniformArena {
    buffer: Box<[u8]>,
    position: usize,
}

impl UniformArena {
    /// Create an arena of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            position: 0,
        }
    }

    /// Total size in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Current write offset
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bytes left this frame
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn reserve(&mut self, len: usize) -> RenderResult<&mut [u8]> {
        if len > self.remaining() {
            return Err(RenderError::UniformArenaOverflow {
                requested: len,
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        self.position += len;
        Ok(&mut self.buffer[start..self.position])
    }

    /// Append an opcode word
    pub fn write_opcode(&mut self, opcode: u32) -> RenderResult<()> {
        self.reserve(OPCODE_BYTES)?.copy_from_slice(&opcode.to_le_bytes());
        Ok(())
    }

    /// Append raw bytes
    pub fn copy(&mut self, bytes: &[u8]) -> RenderResult<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Append a header and its payload, or nothing if both do not fit
    pub fn write_record(&mut self, opcode: &UniformOpcode, payload: &[u8]) -> RenderResult<()> {
        let len = OPCODE_BYTES + payload.len();
        if len > self.remaining() {
            return Err(RenderError::UniformArenaOverflow {
                requested: len,
                remaining: self.remaining(),
            });
        }
        self.write_opcode(opcode.encode())?;
        self.copy(payload)
    }

    /// Iterate the records written in `range`
    ///
    /// Stops at the first malformed header or truncated payload.
    pub fn read(&self, range: Range<usize>) -> UniformRecords<'_> {
        let end = range.end.min(self.position);
        let start = range.start.min(end);
        UniformRecords {
            bytes: &self.buffer[start..end],
        }
    }

    /// Rewind the cursor for the next frame
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

/// Iterator over [`UniformRecord`]s, see [`UniformArena::read`]
#[derive(Debug, Clone)]
pub struct UniformRecords<'a> {
    bytes: &'a [u8],
}

impl<'a> Iterator for UniformRecords<'a> {
    type Item = UniformRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (header, rest) = self.bytes.split_first_chunk::<OPCODE_BYTES>()?;
        let word = u32::from_le_bytes(*header);
        let Some(opcode) = UniformOpcode::decode(word) else {
            log::warn!("Corrupt uniform opcode 0x{:08X}", word);
            self.bytes = &[];
            return None;
        };
        if rest.len() < opcode.payload_len() {
            log::warn!("Truncated uniform payload for location {}", opcode.location);
            self.bytes = &[];
            return None;
        }
        let (payload, rest) = rest.split_at(opcode.payload_len());
        self.bytes = rest;
        Some(UniformRecord { opcode, payload })
    }
}
