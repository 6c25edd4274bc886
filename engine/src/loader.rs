//! Loader definitions: the shared, memoizing side of the machine.
//!
//! An [`AsyncLoader`] owns the loader function and its configuration,
//! deduplicates concurrent load requests into one shared attempt, and
//! memoizes the first successful resolution permanently. Failures are never
//! cached: a later request after a failure invokes the loader fresh.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use suspense_types::{DEFAULT_DELAY, ErrorAction, LoadError, TimingConfig};

/// Type-erased future produced by a loader function.
pub type LoaderFuture<T> = BoxFuture<'static, Result<T, anyhow::Error>>;

type LoaderFn<T> = Arc<dyn Fn() -> LoaderFuture<T> + Send + Sync>;

/// Factory for the loading placeholder value.
pub type ValueFactory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Factory for the error display value, constructed from the failure.
pub type ErrorValueFactory<T> = Arc<dyn Fn(&LoadError) -> T + Send + Sync>;

/// Retry policy consulted after a failed attempt. Receives the failure and
/// the number of loader requests made so far for the asking activation.
pub type ErrorPolicy = Arc<dyn Fn(&LoadError, u32) -> ErrorAction + Send + Sync>;

/// Configuration for an [`AsyncLoader`].
pub struct LoaderOptions<T> {
    /// Shown once `delay` has elapsed while the attempt is still pending.
    pub loading_value: Option<ValueFactory<T>>,
    /// Shown when an activation settles into the errored state.
    pub error_value: Option<ErrorValueFactory<T>>,
    /// Time before the loading placeholder becomes visible. Zero shows it
    /// immediately on activation.
    pub delay: Duration,
    /// Time before a timeout error is reported. `None` = unbounded. The
    /// timeout never cancels the attempt itself.
    pub timeout: Option<Duration>,
    /// Retry policy consulted on failure. `None` fails immediately.
    pub on_error: Option<ErrorPolicy>,
}

impl<T> Default for LoaderOptions<T> {
    fn default() -> Self {
        Self {
            loading_value: None,
            error_value: None,
            delay: DEFAULT_DELAY,
            timeout: None,
            on_error: None,
        }
    }
}

impl<T> Clone for LoaderOptions<T> {
    fn clone(&self) -> Self {
        Self {
            loading_value: self.loading_value.clone(),
            error_value: self.error_value.clone(),
            delay: self.delay,
            timeout: self.timeout,
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for LoaderOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("loading_value", &self.loading_value.is_some())
            .field("error_value", &self.error_value.is_some())
            .field("delay", &self.delay)
            .field("timeout", &self.timeout)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl<T> LoaderOptions<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_loading(mut self, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.loading_value = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn with_error(mut self, factory: impl Fn(&LoadError) -> T + Send + Sync + 'static) -> Self {
        self.error_value = Some(Arc::new(factory));
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies delay/timeout from a host configuration file.
    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.delay = timing.delay();
        self.timeout = timing.timeout();
        self
    }

    #[must_use]
    pub fn with_on_error(
        mut self,
        policy: impl Fn(&LoadError, u32) -> ErrorAction + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(policy));
        self
    }
}

type SettledResult<T> = Result<T, LoadError>;

/// One load attempt, possibly shared by several observers.
///
/// Cheap to clone; every clone observes the same settlement exactly once via
/// [`Attempt::wait`].
pub struct Attempt<T> {
    repr: AttemptRepr<T>,
}

enum AttemptRepr<T> {
    /// The definition had already resolved; no waiting required.
    Settled(T),
    /// Watching a live attempt task for its published settlement.
    Pending {
        rx: watch::Receiver<Option<SettledResult<T>>>,
    },
}

impl<T> Clone for Attempt<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            AttemptRepr::Settled(value) => AttemptRepr::Settled(value.clone()),
            AttemptRepr::Pending { rx } => AttemptRepr::Pending { rx: rx.clone() },
        };
        Self { repr }
    }
}

impl<T> Attempt<T>
where
    T: Clone,
{
    /// Waits for the attempt to settle.
    ///
    /// If the attempt task died without publishing (the loader panicked),
    /// this resolves to [`LoadError::Abandoned`].
    pub async fn wait(self) -> SettledResult<T> {
        match self.repr {
            AttemptRepr::Settled(value) => Ok(value),
            AttemptRepr::Pending { mut rx } => {
                let settled = match rx.wait_for(Option::is_some).await {
                    Ok(slot) => slot.clone(),
                    Err(_) => None,
                };
                settled.unwrap_or(Err(LoadError::Abandoned))
            }
        }
    }

    /// True if the settlement is already observable without waiting.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match &self.repr {
            AttemptRepr::Settled(_) => true,
            AttemptRepr::Pending { rx } => rx.borrow().is_some(),
        }
    }
}

struct InFlight<T> {
    id: u64,
    rx: watch::Receiver<Option<SettledResult<T>>>,
}

struct SharedSlot<T> {
    /// Memoized success. Once set, never cleared.
    resolved: Option<T>,
    /// The current attempt, if one is live. Cleared on settlement.
    in_flight: Option<InFlight<T>>,
    next_attempt_id: u64,
}

struct LoaderInner<T> {
    load: LoaderFn<T>,
    options: LoaderOptions<T>,
    slot: Mutex<SharedSlot<T>>,
}

impl<T> LoaderInner<T> {
    fn slot(&self) -> MutexGuard<'_, SharedSlot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> LoaderInner<T>
where
    T: Clone,
{
    /// Definition-side bookkeeping for a settled attempt. Runs before the
    /// result is published, so observers never see a settled attempt with a
    /// stale cache or in-flight slot.
    fn settle(&self, id: u64, result: &SettledResult<T>) {
        let mut slot = self.slot();
        if slot.in_flight.as_ref().is_some_and(|live| live.id == id) {
            slot.in_flight = None;
        }
        match result {
            Ok(value) => {
                // First success wins; a straggler from a superseded attempt
                // must not replace an already-memoized value.
                if slot.resolved.is_none() {
                    slot.resolved = Some(value.clone());
                }
                tracing::debug!(attempt_id = id, "loader attempt resolved");
            }
            Err(error) => {
                tracing::debug!(attempt_id = id, %error, "loader attempt failed");
            }
        }
    }
}

/// A lazy-loading definition: owns the loader and its options, memoizes the
/// resolved value, and shares one in-flight attempt among all requesters.
///
/// Cheap-clone handle; clones refer to the same definition.
pub struct AsyncLoader<T> {
    inner: Arc<LoaderInner<T>>,
}

impl<T> Clone for AsyncLoader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for AsyncLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot();
        f.debug_struct("AsyncLoader")
            .field("resolved", &slot.resolved.is_some())
            .field("in_flight", &slot.in_flight.is_some())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<T> AsyncLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a definition with default options.
    pub fn new(loader: impl Fn() -> LoaderFuture<T> + Send + Sync + 'static) -> Self {
        Self::with_options(loader, LoaderOptions::default())
    }

    pub fn with_options(
        loader: impl Fn() -> LoaderFuture<T> + Send + Sync + 'static,
        options: LoaderOptions<T>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                load: Arc::new(loader),
                options,
                slot: Mutex::new(SharedSlot {
                    resolved: None,
                    in_flight: None,
                    next_attempt_id: 0,
                }),
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &LoaderOptions<T> {
        &self.inner.options
    }

    /// The memoized resolved value, if the definition has ever succeeded.
    #[must_use]
    pub fn cached(&self) -> Option<T> {
        self.inner.slot().resolved.clone()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.slot().resolved.is_some()
    }

    /// Requests a load attempt.
    ///
    /// Already resolved: returns a settled handle without invoking the
    /// loader. An attempt in flight: returns a handle sharing it. Otherwise
    /// the loader is invoked once and the new attempt becomes the shared
    /// one for subsequent requesters.
    ///
    /// Must be called within a tokio runtime.
    pub fn request_attempt(&self) -> Attempt<T> {
        let mut slot = self.inner.slot();
        if let Some(value) = &slot.resolved {
            return Attempt {
                repr: AttemptRepr::Settled(value.clone()),
            };
        }
        if let Some(live) = &slot.in_flight {
            return Attempt {
                repr: AttemptRepr::Pending {
                    rx: live.rx.clone(),
                },
            };
        }
        self.spawn_attempt(&mut slot)
    }

    /// Starts a fresh attempt unconditionally, replacing any in-flight one
    /// as the shared attempt for subsequent requesters. The superseded
    /// attempt keeps running; its observers still see its settlement.
    pub fn force_retry(&self) -> Attempt<T> {
        let mut slot = self.inner.slot();
        self.spawn_attempt(&mut slot)
    }

    /// Kicks off (or joins) an attempt ahead of any activation, warming the
    /// memoized value for later activations.
    pub fn prime(&self) -> Attempt<T> {
        self.request_attempt()
    }

    fn spawn_attempt(&self, slot: &mut SharedSlot<T>) -> Attempt<T> {
        let id = slot.next_attempt_id;
        slot.next_attempt_id += 1;

        let (tx, rx) = watch::channel(None);
        slot.in_flight = Some(InFlight { id, rx: rx.clone() });

        let future = (self.inner.load)();
        let inner = Arc::clone(&self.inner);
        tracing::debug!(attempt_id = id, "invoking loader");
        tokio::spawn(async move {
            let result = future.await.map_err(LoadError::load);
            inner.settle(id, &result);
            // Publish after bookkeeping; send only fails if every observer
            // is gone, in which case the memoized value is all that matters.
            let _ = tx.send(Some(result));
        });

        Attempt {
            repr: AttemptRepr::Pending { rx },
        }
    }
}
