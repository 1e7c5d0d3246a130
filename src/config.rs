//! Framer instance configuration.
//!
//! All values are fixed at construction; the buffer geometry (depth and
//! programmable-full threshold) is derived from the maximum supported
//! message length so the output stage can absorb one full message plus a
//! fixed emptying latency without overflowing. Debug flags are explicit
//! per-instance configuration, never process-wide globals, so tests can
//! toggle them without cross-test interference.

use thiserror::Error;

use crate::chunk::WORD_BYTES;

/// Default maximum supported message length in bytes.
pub const DEFAULT_MAX_MESSAGE_LENGTH: u32 = 16 * 1024;

/// Safety margin, in words, subtracted from the programmable-full threshold
/// to tolerate the output buffer's emptying latency.
pub const OUTPUT_FUDGE_WORDS: usize = 64;

/// Default fixed latency, in steps, between the output buffer becoming
/// non-empty and records being observable downstream.
pub const DEFAULT_OUTPUT_EMPTY_LATENCY: usize = 16;

/// Errors produced when deriving a framer configuration.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The maximum message length must be non-zero.
    #[error("maximum message length must be non-zero")]
    ZeroMaxMessageLength,
    /// The maximum message length must fit the signed window level counter.
    #[error("maximum message length {given} exceeds window counter range {limit}")]
    MaxMessageLengthTooLarge {
        /// Requested length.
        given: u32,
        /// Largest representable window level.
        limit: u32,
    },
    /// The derived buffer geometry leaves no room below programmable full.
    #[error("buffer depth {depth} cannot reserve {reserve} words for backpressure")]
    BufferTooShallow {
        /// Derived physical depth in words.
        depth: usize,
        /// Words reserved for one message plus the fudge margin.
        reserve: usize,
    },
}

/// Per-instance debug flags.
///
/// These only affect auxiliary telemetry, never core framing behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugConfig {
    /// Emit `trace!` events for every state transition.
    pub verbose_tracing: bool,
    /// Enable synthetic debug record streams.
    pub debug_streams: bool,
}

/// Immutable configuration for one framer instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramerConfig {
    max_message_length: u32,
    output_buffer_depth: usize,
    programmable_full: usize,
    output_empty_latency: usize,
    debug: DebugConfig,
}

impl FramerConfig {
    /// Derive a configuration for the given maximum message length.
    ///
    /// The output buffer depth is the next power of two holding two maximum
    /// messages in words; the programmable-full threshold reserves one
    /// message plus [`OUTPUT_FUDGE_WORDS`] below physical capacity.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the length is zero, exceeds the window
    /// counter range, or yields a buffer too shallow for its own reserve.
    pub fn new(max_message_length: u32) -> Result<Self, ConfigError> {
        if max_message_length == 0 {
            return Err(ConfigError::ZeroMaxMessageLength);
        }
        if max_message_length > i32::MAX as u32 {
            return Err(ConfigError::MaxMessageLengthTooLarge {
                given: max_message_length,
                limit: i32::MAX as u32,
            });
        }
        let message_words = (max_message_length as usize).div_ceil(WORD_BYTES);
        let depth = (2 * message_words).next_power_of_two();
        let reserve = message_words + OUTPUT_FUDGE_WORDS;
        let programmable_full = depth
            .checked_sub(reserve)
            .ok_or(ConfigError::BufferTooShallow { depth, reserve })?;
        Ok(Self {
            max_message_length,
            output_buffer_depth: depth,
            programmable_full,
            output_empty_latency: DEFAULT_OUTPUT_EMPTY_LATENCY,
            debug: DebugConfig::default(),
        })
    }

    /// Replace the debug flags.
    #[must_use]
    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }

    /// Replace the output empty-to-valid latency.
    #[must_use]
    pub fn with_output_empty_latency(mut self, steps: usize) -> Self {
        self.output_empty_latency = steps;
        self
    }

    /// Maximum supported message length in bytes.
    #[must_use]
    pub const fn max_message_length(&self) -> u32 { self.max_message_length }

    /// Physical output buffer depth in words.
    #[must_use]
    pub const fn output_buffer_depth(&self) -> usize { self.output_buffer_depth }

    /// Occupancy at which backpressure must be asserted.
    #[must_use]
    pub const fn programmable_full(&self) -> usize { self.programmable_full }

    /// Fixed output empty-to-valid latency in steps.
    #[must_use]
    pub const fn output_empty_latency(&self) -> usize { self.output_empty_latency }

    /// Debug flags for this instance.
    #[must_use]
    pub const fn debug(&self) -> DebugConfig { self.debug }
}

impl Default for FramerConfig {
    fn default() -> Self {
        // The reference geometry: 16 KiB messages, 8-byte words.
        let message_words = DEFAULT_MAX_MESSAGE_LENGTH as usize / WORD_BYTES;
        let depth = (2 * message_words).next_power_of_two();
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            output_buffer_depth: depth,
            programmable_full: depth - (message_words + OUTPUT_FUDGE_WORDS),
            output_empty_latency: DEFAULT_OUTPUT_EMPTY_LATENCY,
            debug: DebugConfig::default(),
        }
    }
}
