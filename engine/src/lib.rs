//! Lazy async loading with delay-gated placeholders, timeouts, and retry.
//!
//! # Architecture
//!
//! Two components, composed top-down:
//!
//! - [`AsyncLoader`] - a shared, memoizing definition. Owns the loader
//!   function and its [`LoaderOptions`]; deduplicates concurrent requests
//!   into one in-flight attempt and caches the first success permanently.
//! - [`Activation`] - one logical usage site. Races the shared attempt
//!   against its own delay and timeout timers, derives an [`Output`] for
//!   the renderer, and owns retry bookkeeping via an [`ErrorAction`]
//!   policy.
//!
//! The definition never depends on activations; any number of activations
//! can observe the same definition concurrently, each with independent
//! timers.
//!
//! # Display timeline
//!
//! | Situation | [`Output`] |
//! |-----------|------------|
//! | Pending, delay not yet elapsed | `Empty` |
//! | Pending, delay elapsed | `Loading` (or `Empty` if unconfigured) |
//! | Resolved | `Ready` |
//! | Failed, or timed out with an error value | `Failed` (or `Empty`) |
//!
//! A timeout is advisory: it reports a failure and may switch the display,
//! but the attempt keeps running and a later success still wins.
//!
//! # Hooks
//!
//! The machine pushes no output anywhere itself. It calls
//! [`Hooks::notify`] whenever the selected output may have changed, and
//! forwards every failure to [`Hooks::report_error`] exactly once per
//! occurrence. Flush timing, render diffing, and global error handling all
//! belong to the owner.

pub mod activation;
pub mod loader;

pub use activation::{Activation, Hooks};
pub use loader::{AsyncLoader, Attempt, LoaderFuture, LoaderOptions};

pub use suspense_types as types;
pub use suspense_types::{ErrorAction, LoadError, Output, TimingConfig};
