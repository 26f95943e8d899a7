use std::time::Duration;

/// Default time an idle continuation stays reachable.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(20 * 60);

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runtime settings of a [`ContinuationManager`](crate::ContinuationManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Idle time after which an entry is swept.
    pub expiration: Duration,
    /// Minimum time between sweeps triggered by registry access, and the
    /// period of the background sweeper.
    pub sweep_interval: Duration,
    /// Upper bound on registered entries.
    pub max_entries: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_entries: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}
