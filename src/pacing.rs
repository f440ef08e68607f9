//! Inter-record pacing.
//!
//! Portals throttle aggressive clients; a short randomized delay between
//! records keeps the run well below any rate trigger. Fast mode shrinks the
//! window instead of removing it.

use std::time::Duration;

use rand::Rng;

/// Randomized delay applied between records.
#[derive(Debug, Clone)]
pub struct Pacing {
    min_ms: u64,
    max_ms: u64,
}

impl Pacing {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let max_ms = max_ms.max(min_ms);
        Self { min_ms, max_ms }
    }

    /// Sleep for a random duration within the configured window.
    pub async fn pause(&self) {
        if self.max_ms == 0 {
            return;
        }
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.min_ms..=self.max_ms)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_are_normalized() {
        let pacing = Pacing::new(5000, 1000);
        assert_eq!(pacing.min_ms, 5000);
        assert_eq!(pacing.max_ms, 5000);
    }

    #[tokio::test]
    async fn zero_window_returns_immediately() {
        let pacing = Pacing::new(0, 0);
        let start = std::time::Instant::now();
        pacing.pause().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
