//! Per-activation state machine.
//!
//! An [`Activation`] is one logical usage of an [`AsyncLoader`]: it races
//! the shared attempt against its own delay and timeout timers, derives the
//! displayed output, and owns retry bookkeeping. Several activations of the
//! same definition run their timers independently while sharing one loader
//! invocation.
//!
//! Concurrency correctness rests on a single mechanism: a monotone
//! generation token. Every driver task and timer callback captures the
//! generation it was started under and mutates state only while that
//! generation is still live. Retry and deactivation bump the generation, so
//! superseded continuations become no-ops without any cancellation plumbing.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time;

use suspense_types::{ErrorAction, LoadError, Output};

use crate::loader::{AsyncLoader, Attempt};

/// Callbacks into the activation's owner.
#[derive(Clone)]
pub struct Hooks {
    /// Tells the owner to re-derive output and schedule a visual update.
    /// May fire several times per tick; coalescing is the owner's job.
    pub notify: Arc<dyn Fn() + Send + Sync>,
    /// Forwards failures to a global handler.
    pub report_error: Option<Arc<dyn Fn(&LoadError) + Send + Sync>>,
}

impl Hooks {
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
            report_error: None,
        }
    }

    /// Hooks that do nothing, for owners that poll [`Activation::output`].
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    #[must_use]
    pub fn with_report_error(mut self, report: impl Fn(&LoadError) + Send + Sync + 'static) -> Self {
        self.report_error = Some(Arc::new(report));
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("report_error", &self.report_error.is_some())
            .finish()
    }
}

#[derive(Clone)]
enum DisplayState<T> {
    Idle,
    Loading { placeholder_visible: bool },
    Resolved(T),
    Errored(LoadError),
}

struct ActivationState<T> {
    display: DisplayState<T>,
    /// Loader requests made on behalf of this activation, retries included.
    attempt_count: u32,
    /// Live generation token. Continuations from older generations no-op.
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

struct ActivationInner<T> {
    loader: AsyncLoader<T>,
    hooks: Hooks,
    state: Mutex<ActivationState<T>>,
}

/// One activation of an [`AsyncLoader`].
///
/// Construction activates immediately; dropping (or [`deactivate`]) tears
/// down this activation's timers without cancelling the shared attempt.
///
/// [`deactivate`]: Activation::deactivate
pub struct Activation<T> {
    inner: Arc<ActivationInner<T>>,
}

impl<T> Activation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates the activation and immediately starts the load race.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(loader: &AsyncLoader<T>, hooks: Hooks) -> Self {
        let activation = Self {
            inner: Arc::new(ActivationInner {
                loader: loader.clone(),
                hooks,
                state: Mutex::new(ActivationState {
                    display: DisplayState::Idle,
                    attempt_count: 0,
                    generation: 0,
                    driver: None,
                }),
            }),
        };
        activation.activate();
        activation
    }

    /// Starts (or restarts) the load race.
    ///
    /// A definition that has already resolved is observed synchronously: no
    /// timers start and no notify fires; the caller sees the resolved state
    /// from its first [`output`] read. Otherwise a fresh generation begins
    /// racing the shared attempt against this activation's timers.
    ///
    /// [`output`]: Activation::output
    pub fn activate(&self) {
        let mut state = self.inner.lock();
        state.generation += 1;
        if let Some(stale) = state.driver.take() {
            stale.abort();
        }

        if let Some(value) = self.inner.loader.cached() {
            state.display = DisplayState::Resolved(value);
            return;
        }

        state.attempt_count = 1;
        let generation = state.generation;
        let delay = self.inner.loader.options().delay;
        state.display = DisplayState::Loading {
            placeholder_visible: delay.is_zero(),
        };

        let attempt = self.inner.loader.request_attempt();
        state.driver = Some(tokio::spawn(drive(
            Arc::clone(&self.inner),
            generation,
            attempt,
        )));
    }

    /// Tears down this activation's race.
    ///
    /// Its timers die with the driver task; the shared attempt keeps
    /// running so other activations (or a later reactivation) still benefit
    /// from its settlement.
    pub fn deactivate(&self) {
        let mut state = self.inner.lock();
        state.generation += 1;
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        state.display = DisplayState::Idle;
    }

    /// Selects what should be displayed, as a pure function of state.
    #[must_use]
    pub fn output(&self) -> Output<T> {
        let display = self.inner.lock().display.clone();
        let options = self.inner.loader.options();
        match display {
            DisplayState::Idle
            | DisplayState::Loading {
                placeholder_visible: false,
            } => Output::Empty,
            DisplayState::Loading {
                placeholder_visible: true,
            } => options
                .loading_value
                .as_ref()
                .map_or(Output::Empty, |factory| Output::Loading(factory())),
            DisplayState::Resolved(value) => Output::Ready(value),
            DisplayState::Errored(error) => options
                .error_value
                .as_ref()
                .map_or(Output::Empty, |factory| Output::Failed(factory(&error))),
        }
    }

    /// Loader requests made on behalf of this activation, retries included.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.inner.lock().attempt_count
    }
}

impl<T> Drop for Activation<T> {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.generation += 1;
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
    }
}

enum FailureOutcome<T> {
    /// The failure settled this activation (or a newer generation took
    /// over); the driver is done.
    Settled,
    /// The policy asked for a retry; race again under the new generation.
    Restart { generation: u64, attempt: Attempt<T> },
}

/// Driver task for one activation. Each loop iteration races one attempt
/// under one generation; a retry decision starts the next iteration with
/// fresh timers.
async fn drive<T>(inner: Arc<ActivationInner<T>>, mut generation: u64, mut attempt: Attempt<T>)
where
    T: Clone + Send + Sync + 'static,
{
    loop {
        match race(&inner, generation, attempt).await {
            Ok(value) => {
                inner.complete(generation, value);
                return;
            }
            Err(error) => match inner.handle_failure(generation, &error) {
                FailureOutcome::Settled => return,
                FailureOutcome::Restart {
                    generation: next,
                    attempt: fresh,
                } => {
                    generation = next;
                    attempt = fresh;
                }
            },
        }
    }
}

/// Races the attempt's settlement against this activation's delay and
/// timeout timers. Timer firings mutate display state but never end the
/// race; only settlement does. In particular a timeout leaves the attempt
/// running, so a success arriving afterwards still wins.
async fn race<T>(
    inner: &Arc<ActivationInner<T>>,
    generation: u64,
    attempt: Attempt<T>,
) -> Result<T, LoadError>
where
    T: Clone + Send + Sync + 'static,
{
    let options = inner.loader.options();
    let mut delay_armed = !options.delay.is_zero();
    let mut timeout_armed = options.timeout.is_some();

    let mut settled = pin!(attempt.wait());
    let mut delay_timer = pin!(time::sleep(options.delay));
    let mut timeout_timer = pin!(time::sleep(options.timeout.unwrap_or_default()));

    loop {
        tokio::select! {
            result = &mut settled => return result,
            () = &mut delay_timer, if delay_armed => {
                delay_armed = false;
                inner.reveal_placeholder(generation);
            }
            () = &mut timeout_timer, if timeout_armed => {
                timeout_armed = false;
                inner.handle_timeout(generation);
            }
        }
    }
}

impl<T> ActivationInner<T> {
    fn lock(&self) -> MutexGuard<'_, ActivationState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> ActivationInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The delay elapsed with the attempt still pending: show the loading
    /// placeholder.
    fn reveal_placeholder(&self, generation: u64) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            match &mut state.display {
                DisplayState::Loading {
                    placeholder_visible,
                } => *placeholder_visible = true,
                _ => return,
            }
        }
        tracing::debug!("loading placeholder revealed");
        (self.hooks.notify)();
    }

    /// The timeout elapsed with the attempt still pending. The failure is
    /// reported, and shown if an error display value is configured, but the
    /// attempt itself keeps running.
    fn handle_timeout(&self, generation: u64) {
        let options = self.loader.options();
        let Some(timeout) = options.timeout else {
            return;
        };
        let timeout_ms = timeout.as_millis() as u64;
        let error = LoadError::Timeout { timeout_ms };

        if self.lock().generation != generation {
            return;
        }
        tracing::debug!(timeout_ms, "attempt timed out; load continues");
        self.report(&error);

        if options.error_value.is_some() {
            {
                let mut state = self.lock();
                if state.generation != generation {
                    return;
                }
                state.display = DisplayState::Errored(error);
            }
            (self.hooks.notify)();
        }
    }

    /// The attempt resolved. Overrides any timeout-induced errored display
    /// for the same generation.
    fn complete(&self, generation: u64, value: T) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.display = DisplayState::Resolved(value);
        }
        (self.hooks.notify)();
    }

    /// The attempt failed. Reports once, then consults the retry policy
    /// (absent policy = fail immediately).
    fn handle_failure(&self, generation: u64, error: &LoadError) -> FailureOutcome<T> {
        let attempt_count = {
            let state = self.lock();
            if state.generation != generation {
                return FailureOutcome::Settled;
            }
            state.attempt_count
        };

        self.report(error);

        let action = match &self.loader.options().on_error {
            Some(policy) => policy(error, attempt_count),
            None => ErrorAction::Fail,
        };
        match action {
            ErrorAction::Retry => self.retry(generation),
            ErrorAction::Fail => {
                self.fail(generation, error.clone());
                FailureOutcome::Settled
            }
        }
    }

    /// Starts a fresh attempt under a new generation; timers restart and
    /// the placeholder re-gates behind the delay.
    fn retry(&self, generation: u64) -> FailureOutcome<T> {
        let (next, notify_reset) = {
            let mut state = self.lock();
            if state.generation != generation {
                return FailureOutcome::Settled;
            }
            let was_visible = matches!(
                state.display,
                DisplayState::Loading {
                    placeholder_visible: true
                } | DisplayState::Errored(_)
            );
            state.generation += 1;
            state.attempt_count += 1;
            state.display = DisplayState::Loading {
                placeholder_visible: self.loader.options().delay.is_zero(),
            };
            tracing::debug!(attempt_count = state.attempt_count, "retrying loader");
            (state.generation, was_visible)
        };
        if notify_reset {
            (self.hooks.notify)();
        }
        let attempt = self.loader.force_retry();
        FailureOutcome::Restart {
            generation: next,
            attempt,
        }
    }

    /// Terminal failure for this generation: no attempt remains in flight
    /// under it, so no later settlement can override the errored display.
    fn fail(&self, generation: u64, error: LoadError) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.display = DisplayState::Errored(error);
        }
        (self.hooks.notify)();
    }

    /// Forwards a failure to the owner's error hook. Without a hook and
    /// without an error display value the failure would otherwise vanish
    /// silently, so a diagnostic warning is logged instead.
    fn report(&self, error: &LoadError) {
        if let Some(report) = &self.hooks.report_error {
            report(error);
        } else if self.loader.options().error_value.is_none() {
            tracing::warn!(%error, "Unhandled error during execution of async component loader");
        }
    }
}
