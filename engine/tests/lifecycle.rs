//! End-to-end lifecycle scenarios: full display timelines, shared
//! attempts across activations, and repeated activate/deactivate cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use suspense_engine::{
    Activation, AsyncLoader, ErrorAction, Hooks, LoaderFuture, LoaderOptions, Output, TimingConfig,
};

/// Lets spawned attempt/driver tasks run to their next await point.
async fn drain() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn gated_loader(
    calls: Arc<AtomicU32>,
    gate: watch::Receiver<bool>,
) -> impl Fn() -> LoaderFuture<String> {
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = gate.clone();
        Box::pin(async move {
            let _ = gate.wait_for(|open| *open).await;
            Ok("widget".to_string())
        })
    }
}

#[tokio::test(start_paused = true)]
async fn display_timeline_empty_then_loading_then_timeout_error() {
    let options = LoaderOptions::new()
        .with_loading(|| "loading...".to_string())
        .with_error(|error| error.to_string())
        .with_delay(Duration::from_millis(1))
        .with_timeout(Duration::from_millis(16));
    let loader =
        AsyncLoader::with_options(|| Box::pin(futures_util::future::pending()), options);

    let reports = Arc::new(AtomicU32::new(0));
    let count = Arc::clone(&reports);
    let hooks = Hooks::noop().with_report_error(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });
    let activation = Activation::new(&loader, hooks);

    assert!(activation.output().is_empty());

    time::sleep(Duration::from_millis(2)).await;
    drain().await;
    assert_eq!(
        activation.output(),
        Output::Loading("loading...".to_string())
    );
    assert_eq!(reports.load(Ordering::SeqCst), 0);

    time::sleep(Duration::from_millis(15)).await;
    drain().await;
    assert_eq!(
        activation.output(),
        Output::Failed("Async component timed out after 16ms.".to_string())
    );
    assert_eq!(reports.load(Ordering::SeqCst), 1);

    // No further reports arrive while the load stays pending.
    time::sleep(Duration::from_secs(1)).await;
    drain().await;
    assert_eq!(reports.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn two_activations_share_one_loader_invocation() {
    let calls = Arc::new(AtomicU32::new(0));
    let (open, gate) = watch::channel(false);
    let loader = AsyncLoader::new(gated_loader(Arc::clone(&calls), gate));

    let first = Activation::new(&loader, Hooks::noop());
    let second = Activation::new(&loader, Hooks::noop());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    open.send(true).expect("gate send");
    drain().await;

    assert_eq!(first.output(), Output::Ready("widget".to_string()));
    assert_eq!(second.output(), Output::Ready("widget".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn loader_runs_once_across_activation_cycles() {
    let calls = Arc::new(AtomicU32::new(0));
    let (open, gate) = watch::channel(true);
    let loader = AsyncLoader::new(gated_loader(Arc::clone(&calls), gate));
    drop(open);

    let activation = Activation::new(&loader, Hooks::noop());
    drain().await;
    assert_eq!(activation.output(), Output::Ready("widget".to_string()));

    for _ in 0..3 {
        activation.deactivate();
        assert!(activation.output().is_empty());
        activation.activate();
        assert_eq!(activation.output(), Output::Ready("widget".to_string()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn bounded_retry_policy_gives_up_with_error_display() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let options = LoaderOptions::new()
        .with_error(|_| "gave up".to_string())
        .with_on_error(|_, attempt_count| {
            if attempt_count < 3 {
                ErrorAction::Retry
            } else {
                ErrorAction::Fail
            }
        });
    let loader = AsyncLoader::with_options(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(anyhow::anyhow!("still down")) })
        },
        options,
    );

    let reports = Arc::new(AtomicU32::new(0));
    let report_count = Arc::clone(&reports);
    let hooks = Hooks::noop().with_report_error(move |_| {
        report_count.fetch_add(1, Ordering::SeqCst);
    });
    let activation = Activation::new(&loader, hooks);
    drain().await;

    assert_eq!(activation.output(), Output::Failed("gave up".to_string()));
    assert_eq!(activation.attempt_count(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // One report per failure occurrence, retries included.
    assert_eq!(reports.load(Ordering::SeqCst), 3);

    // Terminal: no loader invocation happens for this activation anymore.
    time::sleep(Duration::from_secs(5)).await;
    drain().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // An independent reactivation starts over, re-running the same policy:
    // three fresh attempts before giving up again.
    activation.activate();
    drain().await;
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(activation.attempt_count(), 3);
    assert_eq!(activation.output(), Output::Failed("gave up".to_string()));
    assert_eq!(reports.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn timing_config_flows_into_the_race() {
    let timing = TimingConfig {
        delay_ms: 0,
        timeout_ms: Some(30),
    };
    let options = LoaderOptions::new()
        .with_loading(|| "spinner".to_string())
        .with_error(|error| error.to_string())
        .with_timing(timing);
    let loader =
        AsyncLoader::with_options(|| Box::pin(futures_util::future::pending()), options);

    let activation = Activation::new(&loader, Hooks::noop());
    // Zero delay from config: placeholder shows synchronously.
    assert_eq!(activation.output(), Output::Loading("spinner".to_string()));

    time::sleep(Duration::from_millis(31)).await;
    drain().await;
    assert_eq!(
        activation.output(),
        Output::Failed("Async component timed out after 30ms.".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_an_activation_leaves_the_definition_usable() {
    let calls = Arc::new(AtomicU32::new(0));
    let (open, gate) = watch::channel(false);
    let loader = AsyncLoader::new(gated_loader(Arc::clone(&calls), gate));

    {
        let _activation = Activation::new(&loader, Hooks::noop());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // The attempt outlives the dropped activation and still memoizes.
    open.send(true).expect("gate send");
    drain().await;
    assert!(loader.is_resolved());

    let activation = Activation::new(&loader, Hooks::noop());
    assert_eq!(activation.output(), Output::Ready("widget".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
