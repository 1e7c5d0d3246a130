//! Error taxonomy, fault classification, and fatal pipeline errors.
//!
//! Framing faults never unwind: they latch the owning connection into the
//! error-drain path and surface as a stable [`FramerErrorCode`] on every
//! subsequent output record for that connection. The only fatal condition is
//! a violation of the output stage's backpressure contract.

use thiserror::Error;

/// Per-connection framing error codes.
///
/// Discriminants are a stable, externally documented code table (downstream
/// consumers address codes by ordinal); declaration order is not load-bearing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FramerErrorCode {
    /// No fault detected.
    NoError = 0,
    /// Header signature verification failed.
    HeaderCorrupt = 1,
    /// Header signature was valid but its length structure was not.
    PayloadError = 2,
    /// Connection entered a drain path after an external teardown request.
    ShutdownDrain = 3,
    /// Decoded message length exceeds the configured maximum.
    BodyLengthTooBig = 4,
    /// Reserved for future fault classes.
    Reserved3 = 5,
    /// Stream ended before the declared payload length was satisfied.
    PayloadCutShort = 6,
    /// Aggregate marker: the connection latched at least one prior error.
    PreviousErrors = 7,
}

impl FramerErrorCode {
    /// Stable ordinal exported to downstream consumers.
    #[must_use]
    pub const fn as_ordinal(self) -> u8 { self as u8 }

    /// Decode a code from its stable ordinal.
    #[must_use]
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::NoError),
            1 => Some(Self::HeaderCorrupt),
            2 => Some(Self::PayloadError),
            3 => Some(Self::ShutdownDrain),
            4 => Some(Self::BodyLengthTooBig),
            5 => Some(Self::Reserved3),
            6 => Some(Self::PayloadCutShort),
            7 => Some(Self::PreviousErrors),
            _ => None,
        }
    }

    /// Short stable name, used for metric labels and constant tables.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoError => "no_error",
            Self::HeaderCorrupt => "header_corrupt",
            Self::PayloadError => "payload_error",
            Self::ShutdownDrain => "shutdown_drain",
            Self::BodyLengthTooBig => "body_length_too_big",
            Self::Reserved3 => "reserved3",
            Self::PayloadCutShort => "payload_cut_short",
            Self::PreviousErrors => "previous_errors",
        }
    }
}

impl std::fmt::Display for FramerErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sites at which the assembler can detect a framing fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSite {
    /// `verify_signature` rejected the staged header.
    SignatureCheckFailed,
    /// `validate_length` rejected the staged header structure.
    LengthValidationFailed,
    /// `decode_message_length` produced a length above the configured cap.
    DeclaredLengthTooBig,
    /// The transport signalled end of stream with payload still owed.
    StreamEndedMidMessage,
    /// An external shutdown request arrived for the connection.
    ExternalShutdown,
}

/// Pure mapping from fault sites to the stable error code table.
///
/// The frame assembler is the sole caller; every classified fault latches the
/// owning connection into the drain path.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a detected fault.
    #[must_use]
    pub const fn classify(&self, site: FaultSite) -> FramerErrorCode {
        match site {
            FaultSite::SignatureCheckFailed => FramerErrorCode::HeaderCorrupt,
            FaultSite::LengthValidationFailed => FramerErrorCode::PayloadError,
            FaultSite::DeclaredLengthTooBig => FramerErrorCode::BodyLengthTooBig,
            FaultSite::StreamEndedMidMessage => FramerErrorCode::PayloadCutShort,
            FaultSite::ExternalShutdown => FramerErrorCode::ShutdownDrain,
        }
    }

    /// Whether the fault latches the connection into the drain path.
    ///
    /// Every current fault site drains; the hook exists so future fault
    /// classes (`Reserved3`) can opt out without touching the assembler.
    #[must_use]
    pub const fn enters_drain(&self, _site: FaultSite) -> bool { true }
}

/// Fatal, pipeline-wide failures.
///
/// Unlike per-connection framing faults these indicate the backpressure
/// contract was violated upstream and data loss is otherwise inevitable.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FatalFramerError {
    /// The output buffer was pushed past its physical depth.
    #[error("output buffer overflow: occupancy {occupancy} exceeds depth {depth}")]
    OutputOverflow {
        /// Occupancy the rejected push would have produced.
        occupancy: usize,
        /// Physical buffer depth.
        depth: usize,
    },
}
