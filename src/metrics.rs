//! Metric helpers for `muxframe`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate.

use metrics::{counter, gauge};

use crate::error::FramerErrorCode;

/// Name of the counter tracking completed frames.
pub const FRAMES_ASSEMBLED: &str = "muxframe_frames_assembled_total";
/// Name of the counter tracking latched framing errors, labelled by code.
pub const FRAMING_ERRORS: &str = "muxframe_framing_errors_total";
/// Name of the gauge tracking output buffer occupancy.
pub const OUTPUT_OCCUPANCY: &str = "muxframe_output_buffer_occupancy";

/// Record a completed frame.
pub fn inc_frames_assembled() { counter!(FRAMES_ASSEMBLED).increment(1); }

/// Record a latched framing error.
pub fn inc_framing_errors(code: FramerErrorCode) {
    counter!(FRAMING_ERRORS, "code" => code.as_str()).increment(1);
}

/// Update the output buffer occupancy gauge.
pub fn set_output_occupancy(occupancy: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!(OUTPUT_OCCUPANCY).set(occupancy as f64);
}
