//! Public API for the `muxframe` library.
//!
//! This crate demultiplexes raw byte streams arriving from many concurrent
//! connections and reassembles them into discrete, length-delimited frames.
//! Each connection's framing state is tracked independently in a
//! [`record::ConnectionRecordStore`]; the [`assembler::FrameAssembler`]
//! drives a per-connection state machine parameterised over a pluggable
//! [`protocol::ProtocolSpec`], and the [`output::OutputStage`] applies
//! bounded-buffer backpressure to the framed records.

pub mod assembler;
pub mod chunk;
pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod output;
pub mod protocol;
pub mod record;

pub use assembler::{AssemblerError, FrameAssembler};
pub use chunk::{ConnectionState, InputChunk, OutputRecord, WORD_BYTES, word_chunks};
pub use config::{DebugConfig, FramerConfig};
pub use error::{ErrorClassifier, FatalFramerError, FaultSite, FramerErrorCode};
pub use output::OutputStage;
pub use protocol::{ProtocolId, ProtocolRegistry, ProtocolSpec, SigLenSpec};
pub use record::{ConnectionId, ConnectionRecordStore, FramingPhase, FramingState};
