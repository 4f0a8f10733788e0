//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). The
//! production implementation uses real clocks and the OS RNG; the harness
//! implementation uses a virtual clock and a seeded generator so every
//! scenario replays byte-identically.

use std::time::Duration;

use rand_core::{CryptoRng, RngCore};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards within one execution context
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; the harness uses a
    /// virtual instant it can advance at will.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Wall-clock seconds since the Unix epoch.
    ///
    /// Used only for identity-rotation age and message timestamps, never for
    /// timeout arithmetic.
    fn wall_clock_secs(&self) -> u64;

    /// Sleep for the given duration.
    ///
    /// The only async method in the trait; only driver/runtime code calls
    /// it, never protocol logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Adapter exposing [`Environment::random_bytes`] as a [`rand_core`] RNG.
///
/// Keygen APIs in the crypto layer want an `RngCore + CryptoRng`; this lets
/// them draw from whatever entropy the environment provides, so the harness
/// seed controls key generation too.
pub struct EnvRng<'a, E: Environment> {
    env: &'a E,
}

impl<'a, E: Environment> EnvRng<'a, E> {
    /// Borrow the environment as an RNG.
    pub fn new(env: &'a E) -> Self {
        Self { env }
    }
}

impl<E: Environment> RngCore for EnvRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.env.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.env.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.env.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.env.random_bytes(dest);
        Ok(())
    }
}

// The trait contract requires cryptographically secure entropy.
impl<E: Environment> CryptoRng for EnvRng<'_, E> {}
