//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait keeps the room directory and the room actor's idle
//! timer away from the wall clock, so both can be driven by a manual clock in
//! tests and by the system clock in production.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the only async method in the trait and it is only used by
    /// driver code, never by the room state machine.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
