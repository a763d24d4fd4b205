// SPDX-License-Identifier: PMPL-1.0-or-later
//
// telespool - Event framing codec
//
// Encodes individual events into self-delimiting binary blocks and
// decodes a buffer of blocks back into (kind, payload) pairs.
//
// On-disk block format (all integers little-endian):
//   [1 byte:  kind]            -- 0 = Event; other values reserved
//   [4 bytes: length (u32)]    -- payload length
//   [N bytes: payload]
//
// Fixed-width, fixed-endianness fields keep blocks byte-exact across
// platforms and app versions: a file written by an older build must
// decode in a newer one after an app update. No compression or
// checksums at this layer.

use serde::{Deserialize, Serialize};

use crate::error::{SpoolError, SpoolResult};

/// Size of the fixed block header (kind byte + length field).
pub const BLOCK_HEADER_SIZE: usize = 1 + 4;

// ---------------------------------------------------------------------------
// BlockKind
// ---------------------------------------------------------------------------

/// The kind tag carried by each framed block.
///
/// Only `Event` exists today; the byte is kept in the format so future
/// block kinds can be added without breaking files already on disk.
/// Readers skip blocks whose kind byte they do not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// A generic telemetry event payload.
    Event = 0,
}

impl BlockKind {
    /// Decode a single byte into a `BlockKind`.
    pub fn from_byte(byte: u8) -> SpoolResult<Self> {
        match byte {
            0 => Ok(Self::Event),
            other => Err(SpoolError::UnknownBlockKind(other)),
        }
    }

    /// Encode this kind as a single byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A single framed block: one event's kind tag and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The kind tag for this block.
    pub kind: BlockKind,

    /// Opaque payload bytes (typically one serialized telemetry event).
    pub data: Vec<u8>,
}

impl Block {
    /// Serialize this block to the on-disk format, including the header.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(BLOCK_HEADER_SIZE + self.data.len());
        buffer.push(self.kind.to_byte());
        buffer.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&self.data);
        buffer
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A lazy iterator over the framed blocks in a byte buffer.
///
/// Yields `(kind_byte, payload)` pairs in write order. Stops cleanly
/// (without yielding an error) when the remaining bytes are too few to
/// hold a complete block: a truncated tail is the expected result of a
/// crash mid-append and must not invalidate the blocks before it.
pub struct BlockIterator<'a> {
    buffer: &'a [u8],
    offset: usize,
}

/// One decoded frame. The kind is kept as the raw byte so callers can
/// skip kinds they do not understand instead of failing the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock<'a> {
    /// The raw kind byte as stored on disk.
    pub kind: u8,
    /// Borrowed payload bytes.
    pub data: &'a [u8],
}

impl<'a> BlockIterator<'a> {
    /// Start decoding blocks from the beginning of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// The byte offset the iterator has consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for BlockIterator<'a> {
    type Item = RawBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // A complete header must fit in the remaining bytes.
        if self.offset + BLOCK_HEADER_SIZE > self.buffer.len() {
            return None;
        }

        let kind = self.buffer[self.offset];
        let length_bytes: [u8; 4] = self.buffer[self.offset + 1..self.offset + 5]
            .try_into()
            .ok()?;
        let length = u32::from_le_bytes(length_bytes) as usize;

        let payload_start = self.offset + BLOCK_HEADER_SIZE;
        let payload_end = payload_start + length;
        if payload_end > self.buffer.len() {
            // Truncated final block: drop it, keep everything before it.
            return None;
        }

        let data = &self.buffer[payload_start..payload_end];
        self.offset = payload_end;
        Some(RawBlock { kind, data })
    }
}

/// Decode all complete blocks in `buffer`, in write order.
pub fn decode_all(buffer: &[u8]) -> BlockIterator<'_> {
    BlockIterator::new(buffer)
}
