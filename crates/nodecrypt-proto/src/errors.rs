//! Codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire envelopes.
///
/// Any decode failure is fatal for the transport that produced the frame:
/// the receiver maps it to a `MalformedFrame` disposition and closes. The
/// codec itself never closes anything; it only reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Frame exceeds the configured envelope size cap.
    #[error("envelope too large: {size} bytes (max {max})")]
    Oversized {
        /// Encoded size of the offending frame
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// JSON structure is invalid, the action tag is unknown, or a required
    /// field is missing.
    #[error("malformed envelope: {0}")]
    Json(String),

    /// A binary field holds invalid base64.
    #[error("invalid base64 in field '{field}'")]
    Base64 {
        /// Field whose value failed to decode
        field: &'static str,
    },

    /// A fixed-size binary field has the wrong length.
    #[error("field '{field}' has length {actual}, expected {expected}")]
    BadLength {
        /// Field with the wrong length
        field: &'static str,
        /// Expected byte length
        expected: usize,
        /// Observed byte length
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_sizes() {
        let err = CodecError::Oversized { size: 1024, max: 512 };
        let msg = err.to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));
    }
}
