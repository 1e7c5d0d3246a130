//! Wire-facing input and output records.
//!
//! The framer consumes [`InputChunk`]s — fixed-width data words tagged with a
//! connection identifier — and produces [`OutputRecord`]s carrying the
//! reassembled payload bytes plus per-record framing metadata. Both types are
//! transient: a chunk is consumed within a single processing step and a
//! record is handed straight to the output stage.

use bytes::Buf;
use thiserror::Error;

use crate::{
    error::FramerErrorCode,
    protocol::ProtocolId,
    record::{ConnectionId, FramingState},
};

/// Width of a transport data word in bytes.
pub const WORD_BYTES: usize = 8;

/// Connection lifecycle states reported by the transport.
///
/// Ordinals are stable and exported to downstream consumers; do not rely on
/// declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection exists for this identifier.
    Closed = 0,
    /// Passive open, awaiting a peer.
    Listen = 1,
    /// Active open in progress.
    SynSent = 2,
    /// Connection established; data may flow.
    Established = 3,
    /// Peer closed its half of the connection.
    CloseWait = 4,
    /// Connection is draining prior to teardown.
    ClosedDrain = 5,
}

impl ConnectionState {
    /// Stable ordinal used on the wire and in exported constant tables.
    #[must_use]
    pub const fn as_ordinal(self) -> u8 { self as u8 }

    /// Decode a state from its wire ordinal.
    #[must_use]
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Closed),
            1 => Some(Self::Listen),
            2 => Some(Self::SynSent),
            3 => Some(Self::Established),
            4 => Some(Self::CloseWait),
            5 => Some(Self::ClosedDrain),
            _ => None,
        }
    }
}

/// Error returned when constructing a malformed [`InputChunk`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// More bytes were supplied than fit in one transport word.
    #[error("chunk holds {len} bytes but a word carries at most {WORD_BYTES}")]
    TooWide {
        /// Number of bytes supplied.
        len: usize,
    },
    /// A data chunk must carry at least one valid byte.
    #[error("data chunk carries no valid bytes")]
    Empty,
}

/// One transport delivery: a data word tagged with its connection.
///
/// Chunks arrive in order per connection. `valid_bytes` counts the
/// meaningful bytes in `data`, left-aligned; trailing bytes are padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputChunk {
    /// Connection the word belongs to.
    pub connection_id: ConnectionId,
    /// Raw data word, left-aligned.
    pub data: [u8; WORD_BYTES],
    /// Count of valid bytes in `data` (`1..=8` when `data_present`).
    pub valid_bytes: u8,
    /// Whether the word carries stream data.
    pub data_present: bool,
    /// Whether this chunk is a connection lifecycle event rather than data.
    pub is_connection_event: bool,
}

impl InputChunk {
    /// Build a data chunk from up to [`WORD_BYTES`] stream bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::TooWide`] if `bytes` exceeds one word and
    /// [`ChunkError::Empty`] if it is empty.
    pub fn data(connection_id: ConnectionId, bytes: &[u8]) -> Result<Self, ChunkError> {
        if bytes.is_empty() {
            return Err(ChunkError::Empty);
        }
        if bytes.len() > WORD_BYTES {
            return Err(ChunkError::TooWide { len: bytes.len() });
        }
        let mut data = [0u8; WORD_BYTES];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            connection_id,
            data,
            valid_bytes: bytes.len() as u8,
            data_present: true,
            is_connection_event: false,
        })
    }

    /// Build a connection lifecycle event chunk.
    ///
    /// The new transport state travels in the first data byte, mirroring the
    /// inward event word layout.
    #[must_use]
    pub fn connection_event(connection_id: ConnectionId, state: ConnectionState) -> Self {
        let mut data = [0u8; WORD_BYTES];
        data[0] = state.as_ordinal();
        Self {
            connection_id,
            data,
            valid_bytes: 1,
            data_present: false,
            is_connection_event: true,
        }
    }

    /// Valid stream bytes carried by this chunk.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        if self.data_present {
            &self.data[..usize::from(self.valid_bytes).min(WORD_BYTES)]
        } else {
            &[]
        }
    }
}

/// Split a contiguous byte stream into word-sized data chunks.
///
/// Convenience for feeding a connection's bytes through the assembler in
/// transport order; the final chunk may be partial.
#[must_use]
pub fn word_chunks(connection_id: ConnectionId, mut stream: impl Buf) -> Vec<InputChunk> {
    let mut chunks = Vec::with_capacity(stream.remaining().div_ceil(WORD_BYTES));
    while stream.has_remaining() {
        let take = stream.remaining().min(WORD_BYTES);
        let mut data = [0u8; WORD_BYTES];
        stream.copy_to_slice(&mut data[..take]);
        chunks.push(InputChunk {
            connection_id,
            data,
            valid_bytes: take as u8,
            data_present: true,
            is_connection_event: false,
        });
    }
    chunks
}

/// One outward framed record.
///
/// Every field is always present; `mod_count` uses the 3-bit wire encoding
/// where `0` means a full word when `contains_data` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputRecord {
    /// Payload data word, left-aligned.
    pub data: [u8; WORD_BYTES],
    /// Valid-byte count within `data`, wire-encoded modulo [`WORD_BYTES`].
    pub mod_count: u8,
    /// Set on the first record of a frame.
    pub start_of_frame: bool,
    /// Set on the last record of a frame.
    pub end_of_frame: bool,
    /// Connection the record belongs to.
    pub connection_id: ConnectionId,
    /// Whether `data` carries payload bytes.
    pub contains_data: bool,
    /// Whether `connection_state` reflects a reported transport state.
    pub connection_state_valid: bool,
    /// Last transport state reported for the connection.
    pub connection_state: ConnectionState,
    /// Latched or current error code for the connection.
    pub error_code: FramerErrorCode,
    /// Framing state the connection is in after this record.
    pub framing_state: FramingState,
    /// Signed window level: payload bytes still owed for the current frame.
    pub level: i32,
    /// Protocol spec the connection is bound to.
    pub protocol_id: ProtocolId,
    /// Set when the record bypassed framing (connection events).
    pub is_pass_through: bool,
}

impl OutputRecord {
    /// Number of valid payload bytes in this record.
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        if !self.contains_data {
            return 0;
        }
        if self.mod_count == 0 {
            WORD_BYTES
        } else {
            self.mod_count as usize
        }
    }

    /// Valid payload bytes carried by this record.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.data[..self.payload_len()] }
}

/// Encode a valid-byte count into the 3-bit wire `mod` field.
pub(crate) fn encode_mod(valid: usize) -> u8 { (valid % WORD_BYTES) as u8 }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::partial(3, 3, 3)]
    #[case::full(8, 0, 8)]
    fn data_chunk_and_mod_encoding(
        #[case] len: usize,
        #[case] expected_mod: u8,
        #[case] expected_payload: usize,
    ) {
        let bytes = vec![0xAB; len];
        let chunk = InputChunk::data(ConnectionId::new(1), &bytes).expect("valid width");
        assert_eq!(chunk.payload(), &bytes[..]);
        assert_eq!(encode_mod(len), expected_mod);
        let record = OutputRecord {
            data: chunk.data,
            mod_count: encode_mod(len),
            start_of_frame: false,
            end_of_frame: false,
            connection_id: chunk.connection_id,
            contains_data: true,
            connection_state_valid: false,
            connection_state: ConnectionState::Closed,
            error_code: FramerErrorCode::NoError,
            framing_state: FramingState::Payload,
            level: 0,
            protocol_id: ProtocolId::new(0),
            is_pass_through: false,
        };
        assert_eq!(record.payload_len(), expected_payload);
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let err = InputChunk::data(ConnectionId::new(1), &[0u8; 9]).expect_err("too wide");
        assert_eq!(err, ChunkError::TooWide { len: 9 });
    }

    #[test]
    fn word_chunks_cover_stream_in_order() {
        let stream: Vec<u8> = (0..20).collect();
        let chunks = word_chunks(ConnectionId::new(7), &stream[..]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].payload(), &stream[0..8]);
        assert_eq!(chunks[1].payload(), &stream[8..16]);
        assert_eq!(chunks[2].payload(), &stream[16..20]);
    }

    #[test]
    fn connection_state_ordinals_round_trip() {
        for ordinal in 0..=5u8 {
            let state = ConnectionState::from_ordinal(ordinal).expect("known ordinal");
            assert_eq!(state.as_ordinal(), ordinal);
        }
        assert_eq!(ConnectionState::from_ordinal(6), None);
    }
}
