//! The per-connection framing state machine.
//!
//! One [`FrameAssembler`] instance processes chunks for all connections,
//! multiplexed by identifier. Each step is fully synchronous: one chunk in,
//! zero or more [`OutputRecord`]s out, exactly one connection record
//! mutated. Chunks for a given connection are processed strictly in arrival
//! order; connections never share state, so a fault on one can never corrupt
//! another's framing.
//!
//! Header bytes are stripped from the output; payload bytes are re-packed
//! into fresh words at the connection's staged byte-lane offset, so a
//! message may begin mid-word without losing alignment.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    chunk::{ConnectionState, InputChunk, OutputRecord, WORD_BYTES, encode_mod},
    config::FramerConfig,
    error::{ErrorClassifier, FatalFramerError, FaultSite},
    output::OutputStage,
    protocol::{ProtocolId, ProtocolRegistry, ProtocolSpec},
    record::{ConnectionId, ConnectionRecord, ConnectionRecordStore, FramingPhase, FramingState},
};

/// Errors from assembler construction and per-connection control operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AssemblerError {
    /// At least one protocol spec must be registered.
    #[error("protocol registry is empty")]
    EmptyRegistry,
    /// The requested protocol selector is not registered.
    #[error("no protocol registered for id {id}")]
    UnknownProtocol {
        /// Selector that failed to resolve.
        id: ProtocolId,
    },
    /// The active protocol spec must not change mid-message.
    #[error("cannot rebind protocol for {id} while a message is in flight")]
    RebindMidMessage {
        /// Connection with framing state in flight.
        id: ConnectionId,
    },
}

/// Per-connection framing state machine multiplexed over all connections.
pub struct FrameAssembler {
    config: FramerConfig,
    registry: ProtocolRegistry,
    classifier: ErrorClassifier,
    records: ConnectionRecordStore,
    max_header_bytes: usize,
    default_protocol: ProtocolId,
    default_spec: Arc<dyn ProtocolSpec>,
}

impl FrameAssembler {
    /// Create an assembler over the given protocol registry.
    ///
    /// The first registered spec is the default for connections that never
    /// bind one explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblerError::EmptyRegistry`] if no spec is registered.
    pub fn new(config: FramerConfig, registry: ProtocolRegistry) -> Result<Self, AssemblerError> {
        let default_protocol = ProtocolId::new(0);
        let default_spec = registry
            .spec(default_protocol)
            .ok_or(AssemblerError::EmptyRegistry)?;
        let default_spec = Arc::clone(default_spec);
        let max_header_bytes = registry.max_header_size_bytes();
        Ok(Self {
            config,
            registry,
            classifier: ErrorClassifier,
            records: ConnectionRecordStore::new(),
            max_header_bytes,
            default_protocol,
            default_spec,
        })
    }

    /// Configuration this instance was built with.
    #[must_use]
    pub fn config(&self) -> &FramerConfig { &self.config }

    /// Registered protocol specs.
    #[must_use]
    pub fn registry(&self) -> &ProtocolRegistry { &self.registry }

    /// Read-only view of the connection record store.
    #[must_use]
    pub fn records(&self) -> &ConnectionRecordStore { &self.records }

    /// Bind a connection to a registered protocol spec.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblerError::UnknownProtocol`] for an unregistered
    /// selector and [`AssemblerError::RebindMidMessage`] if the connection
    /// has framing state in flight (including a latched error).
    pub fn bind_protocol(
        &mut self,
        id: ConnectionId,
        protocol: ProtocolId,
    ) -> Result<(), AssemblerError> {
        let spec = self
            .registry
            .spec(protocol)
            .ok_or(AssemblerError::UnknownProtocol { id: protocol })?;
        let spec = Arc::clone(spec);
        let record = self.record_mut(id);
        let idle = record.phase() == FramingPhase::AwaitHeader && record.header_len() == 0;
        if !idle {
            return Err(AssemblerError::RebindMidMessage { id });
        }
        record.protocol_id = protocol;
        record.protocol = spec;
        Ok(())
    }

    /// Process one inbound chunk, producing zero or more output records.
    ///
    /// Connection lifecycle events reset the framing phase and pass through;
    /// data chunks drive the framing state machine for their connection.
    pub fn process_chunk(&mut self, chunk: &InputChunk) -> Vec<OutputRecord> {
        if self.config.debug().debug_streams {
            trace!(
                connection = %chunk.connection_id,
                event = chunk.is_connection_event,
                data = ?chunk.payload(),
                "inbound chunk"
            );
        }
        if chunk.is_connection_event {
            return self.process_event(chunk);
        }
        if !chunk.data_present {
            return Vec::new();
        }

        let max_length = self.config.max_message_length();
        let classifier = self.classifier;
        let verbose = self.config.debug().verbose_tracing;
        let id = chunk.connection_id;
        let record = self.record_mut(id);

        let bytes = chunk.payload();
        let mut out = Vec::new();
        let mut index = 0;
        while index < bytes.len() {
            match record.phase {
                FramingPhase::ErrorDrain(code) => {
                    // Latched: consume and discard the rest of the chunk,
                    // reporting the sticky code downstream.
                    index = bytes.len();
                    let mut drained = base_record(record, id);
                    drained.error_code = code;
                    out.push(drained);
                }
                FramingPhase::AwaitHeader => {
                    record.push_header_byte(bytes[index]);
                    index += 1;
                    if record.header_len() < record.protocol.minimum_header_size_bytes() {
                        continue;
                    }
                    match validate_header(record, max_length) {
                        Ok(0) => {
                            // Zero-length message: completes without a
                            // payload phase.
                            let mut empty = base_record(record, id);
                            empty.start_of_frame = true;
                            empty.end_of_frame = true;
                            empty.framing_state = FramingState::FrameComplete;
                            out.push(empty);
                            record.complete_message();
                            #[cfg(feature = "metrics")]
                            crate::metrics::inc_frames_assembled();
                            if verbose {
                                trace!(connection = %id, "zero-length frame complete");
                            }
                        }
                        Ok(length) => {
                            record.begin_payload(length);
                            if verbose {
                                trace!(connection = %id, length, "header validated");
                            }
                        }
                        Err(site) => {
                            let code = classifier.classify(site);
                            if classifier.enters_drain(site) {
                                record.latch(code);
                            }
                            warn!(connection = %id, %code, ?site, "framing fault latched");
                            #[cfg(feature = "metrics")]
                            crate::metrics::inc_framing_errors(code);
                            let mut fault = base_record(record, id);
                            fault.error_code = code;
                            fault.framing_state = FramingState::ErrorDrain;
                            out.push(fault);
                            index = bytes.len();
                        }
                    }
                }
                FramingPhase::Payload => {
                    let byte = bytes[index];
                    index += 1;
                    let full_word = record.stage_payload_byte(byte);
                    debug_assert!(
                        record.level >= 0,
                        "window level went negative outside error drain"
                    );
                    let finished = record.bytes_needed == 0;
                    if let Some(word) = full_word {
                        let mut data = base_record(record, id);
                        data.data = word;
                        data.contains_data = true;
                        data.mod_count = 0;
                        data.start_of_frame = !record.frame_started;
                        data.end_of_frame = finished;
                        data.framing_state = if finished {
                            FramingState::FrameComplete
                        } else {
                            FramingState::Payload
                        };
                        out.push(data);
                        record.frame_started = true;
                    } else if finished {
                        let (word, len) = record.take_partial_word();
                        let mut data = base_record(record, id);
                        data.data = word;
                        data.contains_data = len > 0;
                        data.mod_count = encode_mod(len);
                        data.start_of_frame = !record.frame_started;
                        data.end_of_frame = true;
                        data.framing_state = FramingState::FrameComplete;
                        out.push(data);
                    }
                    if finished {
                        record.complete_message();
                        #[cfg(feature = "metrics")]
                        crate::metrics::inc_frames_assembled();
                        if verbose {
                            trace!(connection = %id, "frame complete");
                        }
                    }
                }
            }
        }
        out
    }

    /// Process a chunk and push the resulting records into the output stage.
    ///
    /// # Errors
    ///
    /// Returns [`FatalFramerError::OutputOverflow`] if the output buffer's
    /// physical depth is exceeded; the caller must have honoured
    /// [`OutputStage::is_programmable_full`] before feeding new data.
    pub fn process_into(
        &mut self,
        chunk: &InputChunk,
        output: &mut OutputStage,
    ) -> Result<(), FatalFramerError> {
        for record in self.process_chunk(chunk) {
            output.push(record)?;
        }
        Ok(())
    }

    /// Force a connection into the shutdown drain, discarding any partially
    /// accumulated header or payload.
    ///
    /// The returned record announces the transition; every subsequent record
    /// for the connection carries [`ShutdownDrain`](crate::error::FramerErrorCode::ShutdownDrain) until an
    /// external reset.
    pub fn shutdown(&mut self, id: ConnectionId) -> OutputRecord {
        let code = self.classifier.classify(FaultSite::ExternalShutdown);
        let record = self.record_mut(id);
        record.latch(code);
        debug!(connection = %id, "shutdown drain requested");
        #[cfg(feature = "metrics")]
        crate::metrics::inc_framing_errors(code);
        let mut out = base_record(record, id);
        out.error_code = code;
        out.framing_state = FramingState::ErrorDrain;
        out
    }

    /// Signal that a connection's data stream ended.
    ///
    /// Returns a drain record if a message was still in flight (latching
    /// [`PayloadCutShort`](crate::error::FramerErrorCode::PayloadCutShort)); `None` for an idle or unknown
    /// connection.
    pub fn end_of_stream(&mut self, id: ConnectionId) -> Option<OutputRecord> {
        let classifier = self.classifier;
        let record = self.records.existing_mut(id)?;
        let in_flight = match record.phase {
            FramingPhase::Payload => true,
            FramingPhase::AwaitHeader => record.header_len() > 0,
            FramingPhase::ErrorDrain(_) => false,
        };
        if !in_flight {
            return None;
        }
        let code = classifier.classify(FaultSite::StreamEndedMidMessage);
        record.latch(code);
        warn!(connection = %id, %code, "stream ended mid-message");
        #[cfg(feature = "metrics")]
        crate::metrics::inc_framing_errors(code);
        let mut out = base_record(record, id);
        out.error_code = code;
        out.framing_state = FramingState::ErrorDrain;
        Some(out)
    }

    /// Externally reset a connection's record, clearing any latched error.
    ///
    /// A previously latched error leaves the connection's `prior_errors`
    /// marker set; subsequent healthy records report
    /// [`PreviousErrors`](crate::error::FramerErrorCode::PreviousErrors) in place of `NoError`.
    pub fn reset(&mut self, id: ConnectionId) {
        if let Some(record) = self.records.existing_mut(id) {
            record.reset();
        }
    }

    /// Drop a connection's record entirely, typically on socket teardown.
    pub fn remove(&mut self, id: ConnectionId) { self.records.remove(id); }

    /// Handle a connection lifecycle event: reset the framing phase and pass
    /// the event through without entering the framing path.
    fn process_event(&mut self, chunk: &InputChunk) -> Vec<OutputRecord> {
        let id = chunk.connection_id;
        let state = ConnectionState::from_ordinal(chunk.data[0]);
        let record = self.record_mut(id);
        // A lifecycle event is an external signal about the connection
        // identity; it closes out a latched error like a reset does.
        record.reset();
        if state.is_some() {
            record.transport_state = state;
        }
        let mut out = base_record(record, id);
        out.data = chunk.data;
        out.is_pass_through = true;
        out.framing_state = FramingState::AwaitHeader;
        vec![out]
    }

    fn record_mut(&mut self, id: ConnectionId) -> &mut ConnectionRecord {
        let max_header = self.max_header_bytes;
        let protocol_id = self.default_protocol;
        let spec = Arc::clone(&self.default_spec);
        self.records
            .record_mut(id, move || ConnectionRecord::new(max_header, protocol_id, spec))
    }
}

impl std::fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("connections", &self.records.len())
            .finish_non_exhaustive()
    }
}

/// Run the transient validation step against a fully staged header.
///
/// Validation order is load-bearing: signature, then length structure, then
/// the decoded length bound, so each fault maps to its own code and later
/// checks never run after an earlier failure.
fn validate_header(record: &ConnectionRecord, max_length: u32) -> Result<u32, FaultSite> {
    let staged = record.header_buf.as_slice();
    let protocol = record.protocol.as_ref();
    if !protocol.verify_signature(staged) {
        return Err(FaultSite::SignatureCheckFailed);
    }
    if !protocol.validate_length(staged) {
        return Err(FaultSite::LengthValidationFailed);
    }
    let length = protocol.decode_message_length(staged);
    if length > max_length {
        return Err(FaultSite::DeclaredLengthTooBig);
    }
    Ok(length)
}

/// Template record carrying the connection's ambient metadata.
fn base_record(record: &ConnectionRecord, id: ConnectionId) -> OutputRecord {
    OutputRecord {
        data: [0u8; WORD_BYTES],
        mod_count: 0,
        start_of_frame: false,
        end_of_frame: false,
        connection_id: id,
        contains_data: false,
        connection_state_valid: record.transport_state.is_some(),
        connection_state: record.transport_state.unwrap_or(ConnectionState::Closed),
        error_code: record.ambient_code(),
        framing_state: persistent_state(record),
        level: record.level,
        protocol_id: record.protocol_id,
        is_pass_through: false,
    }
}

fn persistent_state(record: &ConnectionRecord) -> FramingState {
    match record.phase {
        FramingPhase::AwaitHeader if record.header_len() == 0 => FramingState::AwaitHeader,
        FramingPhase::AwaitHeader => FramingState::HeaderStaging,
        FramingPhase::Payload => FramingState::Payload,
        FramingPhase::ErrorDrain(_) => FramingState::ErrorDrain,
    }
}
