//! Bounded output buffer with programmable-full backpressure.
//!
//! The output stage holds assembled [`OutputRecord`]s in a buffer of fixed
//! physical depth. Producers must stop issuing new frame data once
//! [`OutputStage::is_programmable_full`] reports true — the threshold sits a
//! full message's worth of words (plus a fixed fudge margin) below physical
//! capacity so the buffer's emptying latency cannot cause overflow. Pushing
//! past physical capacity is a fatal contract violation, not a recoverable
//! protocol error.

use std::collections::VecDeque;

use bytes::BytesMut;

use crate::{
    chunk::OutputRecord,
    config::FramerConfig,
    error::FatalFramerError,
};

/// Bounded buffer between the frame assembler and the downstream consumer.
#[derive(Debug)]
pub struct OutputStage {
    buffer: VecDeque<OutputRecord>,
    depth: usize,
    programmable_full: usize,
}

impl OutputStage {
    /// Create an output stage sized from the framer configuration.
    #[must_use]
    pub fn new(config: &FramerConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.output_buffer_depth()),
            depth: config.output_buffer_depth(),
            programmable_full: config.programmable_full(),
        }
    }

    /// Append a record.
    ///
    /// # Errors
    ///
    /// Returns [`FatalFramerError::OutputOverflow`] if the push would exceed
    /// the physical depth; this indicates the producer ignored
    /// [`is_programmable_full`](Self::is_programmable_full) and must be
    /// treated as a hard failure of the whole pipeline.
    pub fn push(&mut self, record: OutputRecord) -> Result<(), FatalFramerError> {
        if self.buffer.len() >= self.depth {
            return Err(FatalFramerError::OutputOverflow {
                occupancy: self.buffer.len() + 1,
                depth: self.depth,
            });
        }
        self.buffer.push_back(record);
        #[cfg(feature = "metrics")]
        crate::metrics::set_output_occupancy(self.buffer.len());
        Ok(())
    }

    /// Take the oldest record, if any.
    pub fn pop(&mut self) -> Option<OutputRecord> {
        let record = self.buffer.pop_front();
        #[cfg(feature = "metrics")]
        if record.is_some() {
            crate::metrics::set_output_occupancy(self.buffer.len());
        }
        record
    }

    /// Drain all buffered records in order.
    pub fn drain(&mut self) -> Vec<OutputRecord> {
        let records: Vec<OutputRecord> = self.buffer.drain(..).collect();
        #[cfg(feature = "metrics")]
        crate::metrics::set_output_occupancy(0);
        records
    }

    /// Concatenate the payload bytes of all buffered records into `dst`
    /// without consuming them.
    ///
    /// Diagnostic helper for downstream consumers that want the raw stream.
    pub fn copy_payload_to(&self, dst: &mut BytesMut) {
        for record in &self.buffer {
            dst.extend_from_slice(record.payload());
        }
    }

    /// Current occupancy in records.
    #[must_use]
    pub fn occupancy(&self) -> usize { self.buffer.len() }

    /// Physical buffer depth.
    #[must_use]
    pub const fn depth(&self) -> usize { self.depth }

    /// Whether producers must stop issuing new frame data.
    #[must_use]
    pub fn is_programmable_full(&self) -> bool { self.buffer.len() >= self.programmable_full }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::ConnectionState,
        error::FramerErrorCode,
        protocol::ProtocolId,
        record::{ConnectionId, FramingState},
    };

    fn record() -> OutputRecord {
        OutputRecord {
            data: [0u8; 8],
            mod_count: 0,
            start_of_frame: false,
            end_of_frame: false,
            connection_id: ConnectionId::new(1),
            contains_data: true,
            connection_state_valid: false,
            connection_state: ConnectionState::Closed,
            error_code: FramerErrorCode::NoError,
            framing_state: FramingState::Payload,
            level: 0,
            protocol_id: ProtocolId::new(0),
            is_pass_through: false,
        }
    }

    fn small_stage() -> OutputStage {
        // 1 KiB messages: depth 256, programmable full at 256 - (128 + 64).
        OutputStage::new(&FramerConfig::new(1024).expect("valid length"))
    }

    #[test]
    fn programmable_full_asserts_before_physical_capacity() {
        let mut stage = small_stage();
        let threshold = 256 - (128 + 64);
        for pushed in 0..threshold {
            assert!(!stage.is_programmable_full(), "early full at {pushed}");
            stage.push(record()).expect("below depth");
        }
        assert!(stage.is_programmable_full());
        assert!(stage.occupancy() < stage.depth());
    }

    #[test]
    fn overflow_past_depth_is_fatal() {
        let mut stage = small_stage();
        for _ in 0..stage.depth() {
            stage.push(record()).expect("within depth");
        }
        let err = stage.push(record()).expect_err("past depth");
        assert_eq!(
            err,
            FatalFramerError::OutputOverflow {
                occupancy: 257,
                depth: 256,
            }
        );
    }

    #[test]
    fn drain_preserves_order_and_payloads() {
        let mut stage = small_stage();
        for lane in 0..3u8 {
            let mut rec = record();
            rec.data[0] = lane;
            rec.mod_count = 1;
            stage.push(rec).expect("within depth");
        }
        let mut bytes = BytesMut::new();
        stage.copy_payload_to(&mut bytes);
        assert_eq!(&bytes[..], &[0, 1, 2]);

        let drained = stage.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[1].data[0], 1);
        assert_eq!(stage.occupancy(), 0);
    }
}
