//! Relay configuration.

use std::time::Duration;

/// Default identity rotation interval (24 hours).
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default idle timeout: close a session 60 s after its last frame.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default envelope size cap: a 256 KiB file chunk, base64-expanded and
/// double-wrapped, stays comfortably under 512 KiB.
pub const DEFAULT_MAX_ENVELOPE_BYTES: usize = 512 * 1024;

/// Granularity of the idle/rotation tick.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Tunables for a relay instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Regenerate the RSA identity when it reaches this age.
    pub rsa_rotation_interval: Duration,
    /// Close sessions idle for this long.
    pub idle_timeout: Duration,
    /// Reject frames larger than this before parsing.
    pub max_envelope_bytes: usize,
    /// Refuse new transports beyond this many concurrent sessions.
    pub max_connections: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rsa_rotation_interval: DEFAULT_ROTATION_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_envelope_bytes: DEFAULT_MAX_ENVELOPE_BYTES,
            max_connections: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = RelayConfig::default();
        assert_eq!(config.rsa_rotation_interval, Duration::from_secs(86_400));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.max_envelope_bytes, 524_288);
    }
}
