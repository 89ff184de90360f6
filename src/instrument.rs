//! Operation timing for everything issued through the connection manager

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use crate::Config;

/// Counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentationStats {
    pub operations: u64,
    pub slow_operations: u64,
    pub failed_operations: u64,
}

pub struct Instrumentation {
    slow_threshold: Duration,
    verbose: bool,
    operations: AtomicU64,
    slow_operations: AtomicU64,
    failed_operations: AtomicU64,
}

impl Instrumentation {
    pub fn new(slow_threshold: Duration, verbose: bool) -> Self {
        Self {
            slow_threshold,
            verbose,
            operations: AtomicU64::new(0),
            slow_operations: AtomicU64::new(0),
            failed_operations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.slow_query_threshold(), config.verbose_queries)
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Time `f` and log it. The result is returned exactly as produced.
    pub fn observe<T, E>(&self, label: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        self.operations.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.failed_operations.fetch_add(1, Ordering::Relaxed);
        }

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        if elapsed > self.slow_threshold {
            self.slow_operations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                operation = label,
                elapsed_ms,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "slow operation"
            );
        } else if self.verbose {
            tracing::debug!(operation = label, elapsed_ms, ok = result.is_ok(), "operation finished");
        }
        result
    }

    pub fn stats(&self) -> InstrumentationStats {
        InstrumentationStats {
            operations: self.operations.load(Ordering::Relaxed),
            slow_operations: self.slow_operations.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_passes_results_through() {
        let inst = Instrumentation::new(Duration::from_secs(60), true);
        assert_eq!(inst.observe("ok", || Ok::<_, String>(7)), Ok(7));
        assert_eq!(inst.observe("err", || Err::<u8, _>("boom".to_string())), Err("boom".to_string()));
        assert_eq!(
            inst.stats(),
            InstrumentationStats {
                operations: 2,
                slow_operations: 0,
                failed_operations: 1,
            }
        );
    }

    #[test]
    fn test_slow_operation_counted() {
        let inst = Instrumentation::new(Duration::from_millis(1), false);
        inst.observe("sleepy", || {
            std::thread::sleep(Duration::from_millis(10));
            Ok::<_, ()>(())
        })
        .unwrap();
        assert_eq!(inst.stats().slow_operations, 1);
    }
}
