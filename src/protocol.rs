//! Pluggable wire-protocol descriptions.
//!
//! A [`ProtocolSpec`] describes one protocol's header shape: how to recognise
//! its signature, how to check the header's length structure, and how to
//! decode the payload length. All methods are pure functions of the staged
//! header bytes. Specs are registered in a [`ProtocolRegistry`] and selected
//! per connection by [`ProtocolId`]; the active spec never changes
//! mid-message.

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Selector for a registered protocol spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProtocolId(u8);

impl ProtocolId {
    /// Create a protocol selector with the provided ordinal.
    #[must_use]
    pub const fn new(id: u8) -> Self { Self(id) }

    /// Return the inner ordinal.
    #[must_use]
    pub const fn as_u8(self) -> u8 { self.0 }
}

impl From<u8> for ProtocolId {
    fn from(value: u8) -> Self { Self(value) }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Description of one wire protocol's header validation and length decoding.
///
/// The frame assembler guarantees that `verify_signature`,
/// `validate_length`, and `decode_message_length` are only invoked with at
/// least [`minimum_header_size_bytes`](Self::minimum_header_size_bytes)
/// staged bytes; calling them with fewer is a contract violation.
///
/// Signature and length validation are deliberately separate so a corrupt
/// signature is reported distinctly from a correctly signed but structurally
/// invalid header.
pub trait ProtocolSpec: Send + Sync {
    /// Whether the staged bytes form a valid header signature.
    fn verify_signature(&self, staged: &[u8]) -> bool;

    /// Whether the header's length structure is valid (reserved bits, field
    /// consistency). Only called after `verify_signature` succeeds.
    fn validate_length(&self, staged: &[u8]) -> bool;

    /// Decode the payload length in bytes from a header that passed both
    /// validation steps.
    fn decode_message_length(&self, staged: &[u8]) -> u32;

    /// Smallest number of staged bytes required before validation may run.
    fn minimum_header_size_bytes(&self) -> usize;

    /// Protocol name, used in exported constant tables and diagnostics.
    fn name(&self) -> &str;
}

/// Error returned when registering a protocol spec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The registry is full; selectors are 8 bits wide.
    #[error("protocol registry full ({limit} entries)")]
    RegistryFull {
        /// Maximum number of registrable specs.
        limit: usize,
    },
    /// A spec declared a zero minimum header size.
    #[error("protocol {name:?} declares a zero minimum header size")]
    ZeroHeaderSize {
        /// Offending protocol name.
        name: String,
    },
}

/// Ordered collection of protocol specs, indexed by [`ProtocolId`].
///
/// Registration order fixes each spec's selector ordinal, mirroring the
/// exported per-protocol constant table.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    specs: Vec<Arc<dyn ProtocolSpec>>,
}

impl ProtocolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a spec, returning the selector it was assigned.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::RegistryFull`] once all 8-bit selectors are
    /// taken and [`ProtocolError::ZeroHeaderSize`] for a spec that stages no
    /// header bytes.
    pub fn register(&mut self, spec: Arc<dyn ProtocolSpec>) -> Result<ProtocolId, ProtocolError> {
        if spec.minimum_header_size_bytes() == 0 {
            return Err(ProtocolError::ZeroHeaderSize {
                name: spec.name().to_owned(),
            });
        }
        let limit = usize::from(u8::MAX) + 1;
        if self.specs.len() >= limit {
            return Err(ProtocolError::RegistryFull { limit });
        }
        let id = ProtocolId::new(self.specs.len() as u8);
        self.specs.push(spec);
        Ok(id)
    }

    /// Resolve a selector to its spec.
    #[must_use]
    pub fn spec(&self, id: ProtocolId) -> Option<&Arc<dyn ProtocolSpec>> {
        self.specs.get(usize::from(id.as_u8()))
    }

    /// Number of registered specs.
    #[must_use]
    pub fn len(&self) -> usize { self.specs.len() }

    /// Whether the registry holds no specs.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }

    /// Largest minimum header size across all registered specs.
    ///
    /// Fixes the per-connection header staging capacity.
    #[must_use]
    pub fn max_header_size_bytes(&self) -> usize {
        self.specs
            .iter()
            .map(|spec| spec.minimum_header_size_bytes())
            .max()
            .unwrap_or(0)
    }

    /// Iterate over `(selector, spec)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ProtocolId, &Arc<dyn ProtocolSpec>)> {
        self.specs
            .iter()
            .enumerate()
            .map(|(index, spec)| (ProtocolId::new(index as u8), spec))
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.specs.iter().map(|spec| spec.name()))
            .finish()
    }
}

/// Reference protocol: two-byte magic signature followed by a big-endian
/// `u16` payload length with a reserved high bit.
///
/// Header layout (4 bytes):
///
/// ```text
/// +--------+--------+-----------------+
/// | magic0 | magic1 | length (u16 BE) |
/// +--------+--------+-----------------+
/// ```
///
/// The length field's most significant bit is reserved and must be clear;
/// a set bit fails `validate_length` rather than signature verification.
#[derive(Clone, Debug)]
pub struct SigLenSpec {
    name: String,
    magic: [u8; 2],
}

impl SigLenSpec {
    /// Default signature magic.
    pub const DEFAULT_MAGIC: [u8; 2] = [0xA5, 0x5A];
    /// Reserved high bit of the length field.
    const RESERVED_LENGTH_BIT: u8 = 0x80;
    /// Header size in bytes.
    pub const HEADER_BYTES: usize = 4;

    /// Create a spec with the default magic.
    #[must_use]
    pub fn new() -> Self { Self::with_magic("siglen", Self::DEFAULT_MAGIC) }

    /// Create a spec with a custom name and magic, for deployments carrying
    /// several `SigLenSpec` variants side by side.
    #[must_use]
    pub fn with_magic(name: &str, magic: [u8; 2]) -> Self {
        Self {
            name: name.to_owned(),
            magic,
        }
    }
}

impl Default for SigLenSpec {
    fn default() -> Self { Self::new() }
}

impl ProtocolSpec for SigLenSpec {
    fn verify_signature(&self, staged: &[u8]) -> bool { staged[..2] == self.magic }

    fn validate_length(&self, staged: &[u8]) -> bool {
        staged[2] & Self::RESERVED_LENGTH_BIT == 0
    }

    fn decode_message_length(&self, staged: &[u8]) -> u32 {
        u32::from(u16::from_be_bytes([staged[2], staged[3]]))
    }

    fn minimum_header_size_bytes(&self) -> usize { Self::HEADER_BYTES }

    fn name(&self) -> &str { &self.name }
}
