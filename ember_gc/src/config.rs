//! Collector configuration.
//!
//! All sizes and thresholds are tunable. Defaults suit a medium working
//! set; the presets cover the common extremes.

/// Configuration for the beltway collector.
///
/// # Example
///
/// ```ignore
/// use ember_gc::GcConfig;
///
/// let config = GcConfig {
///     eden_size: 8 * 1024 * 1024,
///     parallel_scavenging: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    // =========================================================================
    // Belt sizes
    // =========================================================================
    /// Size of eden in bytes.
    ///
    /// Mutators allocate here; every collection empties it. Larger edens
    /// reduce collection frequency but lengthen each pause.
    ///
    /// Default: 2MB
    pub eden_size: usize,

    /// Size of to-space in bytes.
    ///
    /// Must be at least `eden_size`: to-space is the copy reserve for a
    /// full eden of survivors.
    ///
    /// Default: 4MB
    pub to_size: usize,

    /// Size of mature space in bytes.
    ///
    /// Default: 16MB
    pub mature_size: usize,

    // =========================================================================
    // Scavenging
    // =========================================================================
    /// Move reachable objects with a pool of worker threads instead of a
    /// single linear pass.
    ///
    /// Default: false
    pub parallel_scavenging: bool,

    /// Number of scavenger worker threads when parallel scavenging is on.
    ///
    /// Default: available parallelism minus 1, minimum 1
    pub gc_thread_count: usize,

    // =========================================================================
    // Allocation
    // =========================================================================
    /// Thread-local allocation buffer size in bytes.
    ///
    /// Also the chunk granularity of the scavenge side table.
    ///
    /// Default: 32KB
    pub tlab_size: usize,

    /// Log2 of the card size for the write-barrier card table.
    ///
    /// Default: 9 (512-byte cards)
    pub card_shift: u32,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Print phase-by-phase belt state to stderr during collection.
    ///
    /// Default: false
    pub verbose: bool,

    /// Walk and check belt contents before and after collection phases.
    /// Expensive; useful when chasing collector bugs.
    ///
    /// Default: false (enabled in debug builds)
    pub verify: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            eden_size: 2 * 1024 * 1024,
            to_size: 4 * 1024 * 1024,
            mature_size: 16 * 1024 * 1024,
            parallel_scavenging: false,
            gc_thread_count: available_cpus().saturating_sub(1).max(1),
            tlab_size: 32 * 1024,
            card_shift: 9,
            verbose: false,
            verify: cfg!(debug_assertions),
        }
    }
}

impl GcConfig {
    /// Small belts, single-threaded scavenging. Useful for tests that
    /// want many collections.
    pub fn small() -> Self {
        Self {
            eden_size: 64 * 1024,
            to_size: 128 * 1024,
            mature_size: 512 * 1024,
            tlab_size: 4 * 1024,
            verify: true,
            ..Default::default()
        }
    }

    /// Large belts and parallel scavenging for throughput-bound loads.
    pub fn high_throughput() -> Self {
        Self {
            eden_size: 16 * 1024 * 1024,
            to_size: 32 * 1024 * 1024,
            mature_size: 128 * 1024 * 1024,
            parallel_scavenging: true,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eden_size < 16 * 1024 || self.eden_size % crate::OBJECT_ALIGNMENT != 0 {
            return Err(ConfigError::EdenTooSmall);
        }
        if self.to_size < self.eden_size {
            return Err(ConfigError::CopyReserveTooSmall);
        }
        if self.mature_size < self.to_size {
            return Err(ConfigError::MatureTooSmall);
        }
        if self.card_shift < 6 || self.card_shift > 16 {
            return Err(ConfigError::InvalidCardShift);
        }
        if self.tlab_size < 1024 || !self.tlab_size.is_power_of_two() {
            return Err(ConfigError::InvalidTlabSize);
        }
        if self.gc_thread_count == 0 {
            return Err(ConfigError::NoGcThreads);
        }
        Ok(())
    }

    /// Total bytes of heap backing all three belts.
    pub fn total_heap_size(&self) -> usize {
        self.eden_size + self.to_size + self.mature_size
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Eden must be at least 16KB and object-aligned.
    EdenTooSmall,
    /// To-space must be at least as large as eden.
    CopyReserveTooSmall,
    /// Mature space must be at least as large as to-space.
    MatureTooSmall,
    /// Card shift must be in `[6, 16]`.
    InvalidCardShift,
    /// TLAB size must be a power of two, minimum 1KB.
    InvalidTlabSize,
    /// At least one GC thread is required.
    NoGcThreads,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EdenTooSmall => write!(f, "eden must be at least 16KB and aligned"),
            ConfigError::CopyReserveTooSmall => {
                write!(f, "to-space must be at least as large as eden")
            }
            ConfigError::MatureTooSmall => {
                write!(f, "mature space must be at least as large as to-space")
            }
            ConfigError::InvalidCardShift => write!(f, "card shift must be between 6 and 16"),
            ConfigError::InvalidTlabSize => {
                write!(f, "TLAB size must be a power of two, minimum 1KB")
            }
            ConfigError::NoGcThreads => write!(f, "at least one GC thread is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Number of available CPUs.
fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(GcConfig::small().validate().is_ok());
        assert!(GcConfig::high_throughput().validate().is_ok());
    }

    #[test]
    fn test_copy_reserve_must_cover_eden() {
        let config = GcConfig {
            eden_size: 4 * 1024 * 1024,
            to_size: 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CopyReserveTooSmall));
    }

    #[test]
    fn test_invalid_tlab_size() {
        let config = GcConfig {
            tlab_size: 3000,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidTlabSize));
    }
}
