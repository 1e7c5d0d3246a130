//! Per-connection framing state and its store.
//!
//! Each live connection owns one [`ConnectionRecord`] holding everything the
//! framing state machine needs to resume after a step: the staged header
//! bytes, the window level, the payload bytes still owed, and the staged
//! output word with its byte-lane offset. The [`ConnectionRecordStore`] maps
//! connection identifiers to records and is the sole owner of that mutable
//! state.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    chunk::{ConnectionState, WORD_BYTES},
    error::FramerErrorCode,
    protocol::{ProtocolId, ProtocolSpec},
};

/// Identifier assigned to a connection by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Framing phase a connection persists in between processing steps.
///
/// Mutually exclusive by construction: a connection is accumulating a
/// header, forwarding payload, or latched in the error drain. The transient
/// validation and completion states of [`FramingState`] never persist across
/// steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingPhase {
    /// Accumulating header bytes for the next message.
    AwaitHeader,
    /// Forwarding payload bytes against a decoded length.
    Payload,
    /// Latched error; all further bytes are discarded until external reset.
    ErrorDrain(FramerErrorCode),
}

/// Full framing state enumeration exported on output records.
///
/// Ordinals are stable and include the transient states so downstream
/// consumers observe validation and completion steps by code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FramingState {
    /// Awaiting or accumulating header bytes.
    AwaitHeader = 0,
    /// Header bytes staged but below the protocol minimum.
    HeaderStaging = 1,
    /// Header complete, validation in progress (transient).
    Validating = 2,
    /// Forwarding payload bytes.
    Payload = 3,
    /// Frame finished this step (transient).
    FrameComplete = 4,
    /// Latched error drain.
    ErrorDrain = 5,
}

impl FramingState {
    /// Stable ordinal exported to downstream consumers.
    #[must_use]
    pub const fn as_ordinal(self) -> u8 { self as u8 }

    /// Decode a state from its stable ordinal.
    #[must_use]
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::AwaitHeader),
            1 => Some(Self::HeaderStaging),
            2 => Some(Self::Validating),
            3 => Some(Self::Payload),
            4 => Some(Self::FrameComplete),
            5 => Some(Self::ErrorDrain),
            _ => None,
        }
    }
}

/// Per-connection framing state.
///
/// The record fully captures everything needed to resume framing after a
/// step; the assembler borrows exactly one record per processed chunk.
pub struct ConnectionRecord {
    /// Staged header bytes for the message being framed; never grows past
    /// `max_header_bytes`.
    pub(crate) header_buf: Vec<u8>,
    /// Largest header any registered protocol declares.
    max_header_bytes: usize,
    /// Signed window level: payload bytes still owed for the current frame.
    pub(crate) level: i32,
    /// Payload length decoded from the header, counted down as bytes arrive.
    pub(crate) bytes_needed: u32,
    /// Staged outbound word being refilled with payload bytes.
    pub(crate) out_word: [u8; WORD_BYTES],
    /// Byte-lane offset within `out_word` where reassembly last left off.
    pub(crate) out_pos: usize,
    /// Persistent framing phase.
    pub(crate) phase: FramingPhase,
    /// True once a validated header exists for the current message.
    pub(crate) header_seen: bool,
    /// True once the first payload record of the current frame was emitted.
    pub(crate) frame_started: bool,
    /// The connection latched at least one error before its last reset.
    pub(crate) prior_errors: bool,
    /// Protocol the connection is bound to; fixed for the message in flight.
    pub(crate) protocol_id: ProtocolId,
    pub(crate) protocol: Arc<dyn ProtocolSpec>,
    /// Last transport state reported via a connection event, if any.
    pub(crate) transport_state: Option<ConnectionState>,
}

impl ConnectionRecord {
    pub(crate) fn new(
        max_header_bytes: usize,
        protocol_id: ProtocolId,
        protocol: Arc<dyn ProtocolSpec>,
    ) -> Self {
        Self {
            header_buf: Vec::with_capacity(max_header_bytes),
            max_header_bytes,
            level: 0,
            bytes_needed: 0,
            out_word: [0u8; WORD_BYTES],
            out_pos: 0,
            phase: FramingPhase::AwaitHeader,
            header_seen: false,
            frame_started: false,
            prior_errors: false,
            protocol_id,
            protocol,
            transport_state: None,
        }
    }

    /// Current persistent framing phase.
    #[must_use]
    pub fn phase(&self) -> FramingPhase { self.phase }

    /// Current window level.
    #[must_use]
    pub fn level(&self) -> i32 { self.level }

    /// Number of staged header bytes.
    #[must_use]
    pub fn header_len(&self) -> usize { self.header_buf.len() }

    /// Latched error code, if the connection is draining.
    #[must_use]
    pub fn latched_code(&self) -> Option<FramerErrorCode> {
        match self.phase {
            FramingPhase::ErrorDrain(code) => Some(code),
            _ => None,
        }
    }

    /// Whether the connection latched an error before its last reset.
    #[must_use]
    pub fn prior_errors(&self) -> bool { self.prior_errors }

    /// Protocol the connection is bound to.
    #[must_use]
    pub fn protocol_id(&self) -> ProtocolId { self.protocol_id }

    /// Error code carried by output records while the connection is healthy.
    pub(crate) fn ambient_code(&self) -> FramerErrorCode {
        if let FramingPhase::ErrorDrain(code) = self.phase {
            code
        } else if self.prior_errors {
            FramerErrorCode::PreviousErrors
        } else {
            FramerErrorCode::NoError
        }
    }

    /// Stage one header byte. The caller must have checked capacity.
    pub(crate) fn push_header_byte(&mut self, byte: u8) {
        debug_assert!(
            self.header_buf.len() < self.max_header_bytes,
            "header staging overflow is a programming error"
        );
        self.header_buf.push(byte);
    }

    /// Enter the payload phase with the decoded message length.
    pub(crate) fn begin_payload(&mut self, length: u32) {
        self.bytes_needed = length;
        self.level = length as i32;
        self.header_seen = true;
        self.phase = FramingPhase::Payload;
    }

    /// Append a payload byte to the staged output word.
    ///
    /// Returns the completed word when the byte fills the last lane.
    pub(crate) fn stage_payload_byte(&mut self, byte: u8) -> Option<[u8; WORD_BYTES]> {
        self.out_word[self.out_pos] = byte;
        self.out_pos += 1;
        self.bytes_needed -= 1;
        self.level -= 1;
        if self.out_pos == WORD_BYTES {
            self.out_pos = 0;
            Some(self.out_word)
        } else {
            None
        }
    }

    /// Take the partially filled output word, clearing the lane offset.
    pub(crate) fn take_partial_word(&mut self) -> ([u8; WORD_BYTES], usize) {
        let word = self.out_word;
        let len = self.out_pos;
        self.out_pos = 0;
        (word, len)
    }

    /// Clear per-message state after a completed frame.
    pub(crate) fn complete_message(&mut self) {
        self.header_buf.clear();
        self.bytes_needed = 0;
        self.level = 0;
        self.out_pos = 0;
        self.header_seen = false;
        self.frame_started = false;
        self.phase = FramingPhase::AwaitHeader;
    }

    /// Latch the connection into the error drain, discarding per-message
    /// state. Counters freeze at their values when the fault was detected.
    pub(crate) fn latch(&mut self, code: FramerErrorCode) {
        self.phase = FramingPhase::ErrorDrain(code);
        self.out_pos = 0;
        self.frame_started = false;
    }

    /// External reset: clear a latched error and all per-message state.
    ///
    /// A previously latched error leaves the `prior_errors` marker set for
    /// downstream accounting.
    pub(crate) fn reset(&mut self) {
        if matches!(self.phase, FramingPhase::ErrorDrain(_)) {
            self.prior_errors = true;
        }
        self.header_buf.clear();
        self.bytes_needed = 0;
        self.level = 0;
        self.out_pos = 0;
        self.header_seen = false;
        self.frame_started = false;
        self.phase = FramingPhase::AwaitHeader;
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("phase", &self.phase)
            .field("header_len", &self.header_buf.len())
            .field("level", &self.level)
            .field("bytes_needed", &self.bytes_needed)
            .field("out_pos", &self.out_pos)
            .field("prior_errors", &self.prior_errors)
            .field("protocol_id", &self.protocol_id)
            .finish_non_exhaustive()
    }
}

/// Owner of all per-connection framing state, keyed by [`ConnectionId`].
///
/// Records are created lazily on first contact. The store is logically
/// partitioned by identifier; no cross-connection state exists.
#[derive(Debug, Default)]
pub struct ConnectionRecordStore {
    records: HashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Borrow the record for `id`, creating it with `init` on first contact.
    pub(crate) fn record_mut(
        &mut self,
        id: ConnectionId,
        init: impl FnOnce() -> ConnectionRecord,
    ) -> &mut ConnectionRecord {
        self.records.entry(id).or_insert_with(init)
    }

    /// Inspect the record for `id`, if the connection has been seen.
    #[must_use]
    pub fn record(&self, id: ConnectionId) -> Option<&ConnectionRecord> { self.records.get(&id) }

    /// Borrow the record for `id` without creating one.
    pub(crate) fn existing_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.records.get_mut(&id)
    }

    /// Remove the record for `id`, typically on connection teardown.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.records.remove(&id)
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize { self.records.len() }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}
