//! Core domain types for suspense.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the failure taxonomy for lazy loaders, the retry decision
//! enum, the selected-output sum type, and the timing configuration that
//! host applications source from their config files.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default time a pending load stays invisible before the loading
/// placeholder is shown.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

// ============================================================================
// Failure taxonomy
// ============================================================================

/// Why a load attempt failed.
///
/// Settled failures fan out to every handle sharing the attempt, so the
/// loader's error is held behind an `Arc` to keep the type cheaply cloneable.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The loader future itself failed.
    #[error("async loader failed: {source}")]
    Load {
        #[source]
        source: Arc<anyhow::Error>,
    },
    /// The configured timeout elapsed before the attempt settled.
    ///
    /// Advisory only: the underlying attempt keeps running and a later
    /// success still overrides the errored display.
    #[error("Async component timed out after {timeout_ms}ms.")]
    Timeout {
        /// The configured timeout, in milliseconds.
        timeout_ms: u64,
    },
    /// The attempt task died without publishing a result (the loader
    /// panicked). Handled like any other load failure.
    #[error("async loader task dropped without settling")]
    Abandoned,
}

impl LoadError {
    /// Wraps a loader failure.
    #[must_use]
    pub fn load(source: anyhow::Error) -> Self {
        Self::Load {
            source: Arc::new(source),
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Decision returned by an `on_error` policy after a failed attempt.
///
/// The machine imposes no retry limit or backoff of its own; any
/// "max attempts" logic lives in the policy that returns this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Request a fresh attempt. The activation's delay and timeout timers
    /// restart, and pending callbacks from the superseded attempt become
    /// no-ops.
    Retry,
    /// Settle into the errored state. Terminal for this activation until it
    /// is reactivated.
    Fail,
}

// ============================================================================
// Selected output
// ============================================================================

/// What an activation has selected for display.
///
/// A sum type that structurally distinguishes the four renderable
/// situations, ensuring callers cannot mistake a placeholder for real
/// content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output<T> {
    /// Nothing to show: idle, loading with the placeholder still gated by
    /// the delay, or a settled state with no display value configured.
    Empty,
    /// The configured loading placeholder value.
    Loading(T),
    /// The resolved value.
    Ready(T),
    /// The configured error display value.
    Failed(T),
}

impl<T> Output<T> {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The displayed value, if any variant carries one.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Empty => None,
            Self::Loading(v) | Self::Ready(v) | Self::Failed(v) => Some(v),
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Empty => None,
            Self::Loading(v) | Self::Ready(v) | Self::Failed(v) => Some(v),
        }
    }
}

// ============================================================================
// Timing configuration
// ============================================================================

/// Timing knobs in the shape host config files use (milliseconds).
///
/// Convert with [`TimingConfig::delay`] and [`TimingConfig::timeout`]; an
/// absent `timeout_ms` means the load is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Milliseconds before the loading placeholder becomes visible.
    pub delay_ms: u64,
    /// Milliseconds before a timeout error is reported. Absent = unbounded.
    pub timeout_ms: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY.as_millis() as u64,
            timeout_ms: None,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_message_carries_duration() {
        let err = LoadError::Timeout { timeout_ms: 16 };
        assert_eq!(err.to_string(), "Async component timed out after 16ms.");
        assert!(err.is_timeout());
    }

    #[test]
    fn load_error_preserves_source_message() {
        let err = LoadError::load(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "async loader failed: boom");
        assert!(!err.is_timeout());
    }

    #[test]
    fn output_accessors_agree_with_variant() {
        let ready = Output::Ready("widget");
        assert!(ready.is_ready());
        assert!(!ready.is_loading());
        assert_eq!(ready.value(), Some(&"widget"));

        let empty: Output<&str> = Output::Empty;
        assert!(empty.is_empty());
        assert_eq!(empty.value(), None);
        assert_eq!(empty.into_value(), None);

        assert!(Output::Loading("spinner").is_loading());
        assert!(Output::Failed("oops").is_failed());
        assert_eq!(Output::Failed("oops").into_value(), Some("oops"));
    }

    #[test]
    fn timing_config_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.delay(), Duration::from_millis(200));
        assert_eq!(timing.timeout(), None);
    }

    #[test]
    fn timing_config_deserializes_with_defaults() {
        let timing: TimingConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(timing, TimingConfig::default());

        let timing: TimingConfig =
            serde_json::from_str(r#"{"delay_ms": 50, "timeout_ms": 1000}"#).expect("parse");
        assert_eq!(timing.delay(), Duration::from_millis(50));
        assert_eq!(timing.timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn timing_config_rejects_unknown_fields() {
        let result = serde_json::from_str::<TimingConfig>(r#"{"delay": 50}"#);
        assert!(result.is_err());
    }
}
