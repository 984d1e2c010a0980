//! Configuration for the sync engine.

use csync_core::{ConfigFile, RenameDetection, SymlinkPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Configuration directory; `~/.csync` when unset.
    pub config_dir: Option<PathBuf>,
    /// Retry configuration for transient per-path failures.
    pub retry: RetryConfig,
    /// Update detection options.
    pub detect: DetectOptions,
    /// How symlinks are listed; replicas are built with this policy.
    pub symlinks: SymlinkPolicy,
    /// Re-read copied files and compare checksums.
    pub checksum_on_copy: bool,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the detection options.
    pub fn with_detect(mut self, detect: DetectOptions) -> Self {
        self.detect = detect;
        self
    }

    /// Sets the symlink policy.
    pub fn with_symlinks(mut self, symlinks: SymlinkPolicy) -> Self {
        self.symlinks = symlinks;
        self
    }

    /// Enables checksum verification of copies.
    pub fn with_checksum_on_copy(mut self, enabled: bool) -> Self {
        self.checksum_on_copy = enabled;
        self
    }

    /// Applies the keys present in `csync.conf`.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(retries) = file.max_retries {
            self.retry.max_attempts = retries.saturating_add(1);
        }
        if let Some(ms) = file.retry_delay_ms {
            self.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(mode) = file.rename_detection {
            self.detect.rename_detection = mode;
        }
        if let Some(symlinks) = file.symlinks {
            self.symlinks = symlinks;
        }
        if let Some(verify) = file.checksum_on_copy {
            self.checksum_on_copy = verify;
        }
    }
}

/// Options for update detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectOptions {
    /// How moved files are recognised.
    pub rename_detection: RenameDetection,
}

impl DetectOptions {
    /// Sets the rename detection mode.
    pub fn with_rename_detection(mut self, mode: RenameDetection) -> Self {
        self.rename_detection = mode;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * clock_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random factor in `[0, 1)` from the clock's sub-second part.
fn clock_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
