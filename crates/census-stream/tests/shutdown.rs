//! Shutdown integration tests.
//!
//! Handlers sleep on paused time, so running past the shutdown grace
//! period costs nothing.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use census_stream::metrics::HANDLER_FAILURES_TOTAL;
use census_stream::{
    DispatchContext, EventStreamClient, FnHandler, HandlerRegistry, PayloadRegistry,
    ServiceMessage, StreamError, StreamOptions,
};
use census_test::fixtures::{self, PlayerLogin};
use census_test::{FailingHandler, ScriptedConnector, ScriptedSession};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::Notify;
use tokio::time::Instant;

type Login = ServiceMessage<PlayerLogin>;

const GRACE: Duration = Duration::from_secs(1);

fn options() -> StreamOptions {
    StreamOptions::new("example").shutdown_grace(GRACE)
}

fn payloads() -> PayloadRegistry {
    let mut payloads = PayloadRegistry::new();
    payloads.register_event::<PlayerLogin>("PlayerLogin");
    payloads
}

fn one_login() -> ScriptedConnector {
    ScriptedConnector::new([ScriptedSession::new().text(fixtures::player_login(7, 1, 0))])
}

/// Handler that signals `started`, sleeps for `duration`, then sets `finished`.
fn sleeping(duration: Duration, started: Arc<Notify>, finished: Arc<AtomicBool>) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.register::<Login, _>(FnHandler::new(move |_: DispatchContext, _: Arc<Login>| {
        let started = Arc::clone(&started);
        let finished = Arc::clone(&finished);
        async move {
            started.notify_one();
            tokio::time::sleep(duration).await;
            finished.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        }
    }));
    handlers
}

/// Run `test` on a single-threaded paused runtime and render the metrics it
/// recorded.
fn render_metrics<F>(test: impl FnOnce() -> F) -> String
where
    F: Future<Output = ()>,
{
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(test());
    });
    handle.render()
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_running_handler() {
    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let handlers = sleeping(Duration::from_millis(500), started.clone(), finished.clone());
    let client = EventStreamClient::new(options(), one_login(), payloads(), handlers).unwrap();

    client.start().await.unwrap();
    started.notified().await;
    assert_eq!(client.outstanding_dispatches(), 1);

    let stopping = Instant::now();
    client.stop().await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert!(stopping.elapsed() >= Duration::from_millis(500));
    assert!(stopping.elapsed() < GRACE);
    assert_eq!(client.outstanding_dispatches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_handler_past_grace() {
    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let handlers = sleeping(Duration::from_secs(30), started.clone(), finished.clone());
    let client = EventStreamClient::new(options(), one_login(), payloads(), handlers).unwrap();

    client.start().await.unwrap();
    started.notified().await;

    let stopping = Instant::now();
    client.stop().await.unwrap();
    assert!(stopping.elapsed() >= GRACE);
    assert!(stopping.elapsed() < Duration::from_secs(30));
    assert_eq!(client.outstanding_dispatches(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn test_handler_stopped_by_cancellation_is_not_a_failure() {
    let rendered = render_metrics(|| async {
        let started = Arc::new(Notify::new());
        let mut handlers = HandlerRegistry::new();
        let signal = Arc::clone(&started);
        handlers.register::<Login, _>(FnHandler::new(move |ctx: DispatchContext, _: Arc<Login>| {
            let signal = Arc::clone(&signal);
            async move {
                signal.notify_one();
                ctx.cancellation_token().cancelled().await;
                let result: anyhow::Result<()> = Err(StreamError::Cancelled.into());
                result
            }
        }));
        let client = EventStreamClient::new(options(), one_login(), payloads(), handlers).unwrap();

        client.start().await.unwrap();
        started.notified().await;
        client.stop().await.unwrap();
        assert_eq!(client.outstanding_dispatches(), 0);
    });

    assert!(!rendered.contains(HANDLER_FAILURES_TOTAL), "{rendered}");
}

#[test]
fn test_handler_failure_is_counted() {
    let rendered = render_metrics(|| async {
        let failing = FailingHandler::<Login>::new("handler rejected the login");
        let mut handlers = HandlerRegistry::new();
        handlers.register::<Login, _>(failing.clone());
        let client = EventStreamClient::new(options(), one_login(), payloads(), handlers).unwrap();

        client.start().await.unwrap();
        while failing.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        client.stop().await.unwrap();
    });

    assert!(rendered.contains(HANDLER_FAILURES_TOTAL), "{rendered}");
}
