/// Default bound on writes applied by a single drain.
pub const DEFAULT_MAX_CASCADE: usize = 10_000;

/// Configuration for a [`StateStore`](crate::StateStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Maximum number of writes one call to `write`/`update` may apply,
    /// counting writes queued by subscribers while it runs.
    ///
    /// A subscriber that writes the cell it observes would otherwise keep the
    /// queue non-empty forever. When the bound is hit, the remaining queued
    /// writes are dropped and the call returns
    /// [`StoreError::CascadeLimit`](crate::StoreError::CascadeLimit).
    pub max_cascade: usize,
    /// Name attached to log events from this store.
    pub label: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_cascade: DEFAULT_MAX_CASCADE,
            label: None,
        }
    }
}

impl StoreOptions {
    /// Options with no subscriber-driven writes allowed beyond the first.
    ///
    /// Any write issued from inside a subscriber makes the outer write fail.
    pub fn strict() -> Self {
        Self {
            max_cascade: 1,
            ..Self::default()
        }
    }

    /// Set the cascade bound. Values below 1 are raised to 1.
    pub fn with_max_cascade(mut self, max_cascade: usize) -> Self {
        self.max_cascade = max_cascade.max(1);
        self
    }

    /// Name the store in log events.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
