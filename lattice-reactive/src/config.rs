//! Runtime Configuration
//!
//! Each thread's runtime carries a [`RuntimeConfig`]. It can be built in code
//! or loaded from JSON:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "flush_mode": "immediate" }"#)?;
//! lattice_reactive::configure(config);
//! ```
//!
//! Missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// When pending notifications are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushMode {
    /// Mutations coalesce until the next control point: the end of the
    /// outermost [`batch`](crate::batch), [`tick`](crate::tick),
    /// [`settle`](crate::settle) or [`flush_sync`](crate::flush_sync).
    #[default]
    Batched,

    /// Every top-level mutation flushes before returning.
    Immediate,
}

/// Write-suppression policy.
///
/// A write whose new value is equal to the stored one under this policy does
/// not notify anybody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Equality {
    /// Primitives compare by value, nested reactive values by identity, and
    /// plain structured values are always treated as changed, in proxies and
    /// in `Signal<Value>` alike. Other cell types compare with `PartialEq`.
    #[default]
    Shallow,

    /// Compare full snapshots. Costs a deep copy per write.
    Deep,

    /// Every write notifies.
    Never,
}

/// Configuration of the per-thread runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub flush_mode: FlushMode,
    /// Default equality for cells and proxies created after installation.
    pub equality: Equality,
    /// Upper bound on re-queue rounds within one flush.
    pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Batched,
            equality: Equality::Shallow,
            max_flush_rounds: 100,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| ReactiveError::InvalidConfig(e.to_string()))?;
        if config.max_flush_rounds == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_flush_rounds must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    pub fn with_max_flush_rounds(mut self, rounds: usize) -> Self {
        self.max_flush_rounds = rounds.max(1);
        self
    }
}
