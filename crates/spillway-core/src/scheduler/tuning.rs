//! Backlog-driven core size tuning

use crate::config::ExecutorConfig;

/// Core concurrency band selected from the backlog length
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoreBand {
    /// Backlog within ten ready queues: `core_size`
    Steady,
    /// Backlog beyond ten ready queues: `bigger_core_size`
    Bigger,
    /// Backlog beyond a hundred ready queues: `max_core_size`
    Max,
}

impl CoreBand {
    /// Band for `backlog` waiting tasks
    ///
    /// Thresholds are checked highest first.
    pub fn for_backlog(backlog: usize, config: &ExecutorConfig) -> Self {
        let bound = config.max_primary_queue_size;
        if backlog > bound.saturating_mul(100) {
            CoreBand::Max
        } else if backlog > bound.saturating_mul(10) {
            CoreBand::Bigger
        } else {
            CoreBand::Steady
        }
    }

    /// Core size this band maps to
    pub fn core_size(self, config: &ExecutorConfig) -> usize {
        match self {
            CoreBand::Steady => config.core_size,
            CoreBand::Bigger => config.bigger_core_size,
            CoreBand::Max => config.max_core_size,
        }
    }
}

/// Core size the pool should run with for `backlog` waiting tasks
pub fn tuned_core_size(backlog: usize, config: &ExecutorConfig) -> usize {
    CoreBand::for_backlog(backlog, config).core_size(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutorConfig {
        ExecutorConfig::for_parallelism(4)
            .with_core_size(3)
            .with_bigger_core_size(16)
            .with_max_core_size(32)
            .with_max_primary_queue_size(10)
    }

    #[test]
    fn test_band_boundaries() {
        let config = config();
        assert_eq!(tuned_core_size(0, &config), 3);
        assert_eq!(tuned_core_size(100, &config), 3);
        assert_eq!(tuned_core_size(101, &config), 16);
        assert_eq!(tuned_core_size(1000, &config), 16);
        assert_eq!(tuned_core_size(1001, &config), 32);
        assert_eq!(tuned_core_size(usize::MAX, &config), 32);
    }

    #[test]
    fn test_bands_are_monotonic() {
        let config = config();
        let mut previous = tuned_core_size(0, &config);
        for backlog in 0..3000 {
            let size = tuned_core_size(backlog, &config);
            assert!(size >= previous);
            previous = size;
        }
    }

    #[test]
    fn test_tuning_is_idempotent() {
        let config = config();
        for backlog in [0, 50, 101, 500, 1001, 5000] {
            assert_eq!(tuned_core_size(backlog, &config), tuned_core_size(backlog, &config));
        }
    }

    #[test]
    fn test_stays_within_configured_range() {
        let config = config();
        for backlog in (0..20_000).step_by(7) {
            let size = tuned_core_size(backlog, &config);
            assert!(size >= config.core_size && size <= config.max_core_size);
        }
    }

    #[test]
    fn test_band_ordering() {
        let config = config();
        assert_eq!(CoreBand::for_backlog(5, &config), CoreBand::Steady);
        assert_eq!(CoreBand::for_backlog(150, &config), CoreBand::Bigger);
        assert_eq!(CoreBand::for_backlog(1500, &config), CoreBand::Max);
        assert!(CoreBand::Steady < CoreBand::Bigger && CoreBand::Bigger < CoreBand::Max);
    }

    #[test]
    fn test_huge_queue_bound_does_not_overflow() {
        let config = config()
            .with_max_primary_queue_size(usize::MAX / 2)
            .with_core_size(1);
        assert_eq!(tuned_core_size(usize::MAX, &config), 1);
    }
}
