//! Stage configuration.
//!
//! ```rust
//! use interpose::config::{LockPolicy, StageConfig};
//! use std::time::Duration;
//!
//! let config = StageConfig::new("deinterlace")
//!     .with_locks(LockPolicy::none().with_frame(true))
//!     .with_rewire_timeout(Duration::from_millis(500))
//!     .with_pool_prealloc(4);
//! assert!(config.locks.frame);
//! ```

use std::time::Duration;

/// Default stage name.
pub const DEFAULT_STAGE_NAME: &str = "stage";

/// Default number of frame proxies allocated up front per video port.
pub const DEFAULT_POOL_PREALLOC: usize = 0;

/// Which optional per-proxy serialization locks a stage uses.
///
/// The usage lock and the free-list lock always exist; these three only
/// serialize forwarded calls and can be dropped by stages whose collaborators
/// are already thread-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Serialize forwarded port calls.
    pub port: bool,
    /// Serialize frame interception, restoration and frame forwarders.
    pub frame: bool,
    /// Serialize forwarded overlay manager calls.
    pub manager: bool,
}

impl LockPolicy {
    /// All locks enabled.
    pub const fn all() -> Self {
        Self {
            port: true,
            frame: true,
            manager: true,
        }
    }

    /// No optional locks.
    pub const fn none() -> Self {
        Self {
            port: false,
            frame: false,
            manager: false,
        }
    }

    /// Toggle the port lock.
    pub const fn with_port(mut self, enabled: bool) -> Self {
        self.port = enabled;
        self
    }

    /// Toggle the frame lock.
    pub const fn with_frame(mut self, enabled: bool) -> Self {
        self.frame = enabled;
        self
    }

    /// Toggle the manager lock.
    pub const fn with_manager(mut self, enabled: bool) -> Self {
        self.manager = enabled;
        self
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::all()
    }
}

/// Configuration for one processing stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name used in logs and metrics.
    pub name: String,
    /// Optional serialization locks.
    pub locks: LockPolicy,
    /// Bound on waiting for the rewiring exclusion; `None` waits forever.
    pub rewire_timeout: Option<Duration>,
    /// Frame proxies allocated up front per video port.
    pub pool_prealloc: usize,
}

impl StageConfig {
    /// Default configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the stage name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the lock policy.
    pub fn with_locks(mut self, locks: LockPolicy) -> Self {
        self.locks = locks;
        self
    }

    /// Bound the wait for the rewiring exclusion.
    pub fn with_rewire_timeout(mut self, timeout: Duration) -> Self {
        self.rewire_timeout = Some(timeout);
        self
    }

    /// Pre-allocate frame proxies.
    pub fn with_pool_prealloc(mut self, count: usize) -> Self {
        self.pool_prealloc = count;
        self
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STAGE_NAME.to_string(),
            locks: LockPolicy::default(),
            rewire_timeout: None,
            pool_prealloc: DEFAULT_POOL_PREALLOC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StageConfig::default();
        assert_eq!(config.name, DEFAULT_STAGE_NAME);
        assert_eq!(config.locks, LockPolicy::all());
        assert!(config.rewire_timeout.is_none());
        assert_eq!(config.pool_prealloc, 0);
    }

    #[test]
    fn test_builder() {
        let config = StageConfig::new("probe")
            .with_locks(LockPolicy::all().with_manager(false))
            .with_rewire_timeout(Duration::from_secs(1))
            .with_pool_prealloc(8);

        assert_eq!(config.name, "probe");
        assert!(config.locks.port);
        assert!(!config.locks.manager);
        assert_eq!(config.rewire_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.pool_prealloc, 8);
    }
}
