//! Production Environment implementation using system time.

use std::time::{Duration, Instant};

use hubbub_core::Environment;

/// Production environment backed by the system clock and tokio timers.
///
/// Inside a runtime started with paused time, `sleep` follows tokio's
/// virtual clock while `now` keeps reading the wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[tokio::test]
    async fn system_env_sleep_works() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(50)).await;
        let elapsed = env.now() - start;

        assert!(elapsed >= Duration::from_millis(50), "Sleep should wait at least 50ms");
    }
}
