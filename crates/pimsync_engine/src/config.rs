//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync dialogues.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Window size applied when a request leaves `window_size` at 0.
    pub default_window_size: u32,
    /// Upper bound on the per-request window size; larger requests are
    /// clamped.
    pub max_window_size: u32,
    /// How long a windowed-delta continuation stays drainable before the
    /// engine recomputes the remainder from the ledger.
    pub continuation_ttl: Duration,
}

impl SyncConfig {
    /// Creates a configuration with the given default window size.
    pub fn new(default_window_size: u32) -> Self {
        Self {
            default_window_size,
            max_window_size: 512,
            continuation_ttl: Duration::from_secs(300),
        }
    }

    /// Sets the maximum window size.
    pub fn with_max_window_size(mut self, size: u32) -> Self {
        self.max_window_size = size;
        self
    }

    /// Sets the continuation expiry.
    pub fn with_continuation_ttl(mut self, ttl: Duration) -> Self {
        self.continuation_ttl = ttl;
        self
    }

    /// Resolves the effective window size for one request.
    pub fn effective_window(&self, requested: u32) -> u32 {
        let size = if requested == 0 {
            self.default_window_size
        } else {
            requested
        };
        size.min(self.max_window_size)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = SyncConfig::new(50)
            .with_max_window_size(200)
            .with_continuation_ttl(Duration::from_secs(60));

        assert_eq!(config.default_window_size, 50);
        assert_eq!(config.max_window_size, 200);
        assert_eq!(config.continuation_ttl, Duration::from_secs(60));
    }

    #[test]
    fn effective_window_defaults_and_clamps() {
        let config = SyncConfig::new(100).with_max_window_size(256);

        assert_eq!(config.effective_window(0), 100);
        assert_eq!(config.effective_window(25), 25);
        assert_eq!(config.effective_window(9999), 256);
    }
}
