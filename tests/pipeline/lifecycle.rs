use std::time::Duration;

use crate::support::{
    helpers::{
        chunk_windows, collect_until_terminal, init_tracing, next_event, request_with_channel,
        start_gulper, test_config, test_registry, wait_for_registry_len, window, EVENT_TIMEOUT,
    },
    mock_source::MockSource,
};
use anyhow::{bail, Result};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use wavegulp::{
    GulpConfig, GulpEvent, GulpKey, GulpResponse, GulperRegistry, GulperStatus, MemoryCache,
};

fn single_fetch_config() -> GulpConfig {
    GulpConfig::builder()
        .initial_backoff(Duration::ZERO)
        .max_backoff(Duration::ZERO)
        .max_concurrent_fetches(1)
        .build()
        .expect("test config should be valid")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_after_kill_starts_a_fresh_gulper() -> Result<()> {
    init_tracing();
    let (registry, _cache) = test_registry(test_config());
    let source = MockSource::new("iris");
    let key = GulpKey::new("iris", "CH1");
    let gate = source.pause_at(0.0);

    let (first, mut rx) = start_gulper(&registry, &source, "CH1", 0.0, 5400.0).await?;
    gate.wait_until_paused(EVENT_TIMEOUT).await?;

    assert!(registry.kill(&key));
    assert!(registry.kill(&key), "kill stays idempotent until the gulper exits");
    gate.release();

    let events = collect_until_terminal(&mut rx).await?;
    assert!(matches!(
        events.last(),
        Some(GulpEvent::Cancelled { coverage, .. }) if *coverage == window(0.0, 1800.0)
    ));
    assert_eq!(first.wait().await, GulperStatus::Killed);
    assert!(registry.get(&key).is_none());
    assert!(!registry.kill(&key));

    let (second, mut rx) = start_gulper(&registry, &source, "CH1", 0.0, 3600.0).await?;
    assert!(!second.same_gulper(&first));
    assert_ne!(second.id(), first.id());
    let events = collect_until_terminal(&mut rx).await?;
    assert_eq!(chunk_windows(&events).len(), 2);
    assert_eq!(registry.telemetry().snapshot().gulpers_started, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn extending_a_finished_gulper_is_a_noop() -> Result<()> {
    let (registry, _cache) = test_registry(test_config());
    let source = MockSource::new("iris");

    let (handle, mut rx) = start_gulper(&registry, &source, "CH1", 0.0, 1800.0).await?;
    collect_until_terminal(&mut rx).await?;
    assert_eq!(handle.wait().await, GulperStatus::Done);

    assert!(!handle.extend(window(1800.0, 3600.0)));
    assert_eq!(handle.target(), window(0.0, 1800.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_channels_get_distinct_gulpers() -> Result<()> {
    let (registry, cache) = test_registry(test_config());
    let source = MockSource::new("iris");
    let gate = source.pause_at(0.0);

    let (first, mut rx1) = start_gulper(&registry, &source, "CH1", 0.0, 3600.0).await?;
    gate.wait_until_paused(EVENT_TIMEOUT).await?;
    let (second, mut rx2) = start_gulper(&registry, &source, "CH2", 1800.0, 3600.0).await?;

    assert!(!first.same_gulper(&second));
    assert_eq!(
        registry.active_keys().len(),
        2,
        "both channels should be live while CH1 is paused"
    );

    gate.release();
    collect_until_terminal(&mut rx1).await?;
    collect_until_terminal(&mut rx2).await?;
    wait_for_registry_len(&registry, 0, EVENT_TIMEOUT).await?;

    assert_eq!(cache.channels(), vec!["CH1".to_string(), "CH2".to_string()]);
    let summary = cache.summary();
    assert_eq!(summary[0].extent, Some(window(0.0, 3600.0)));
    assert_eq!(summary[1].extent, Some(window(1800.0, 3600.0)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetches_are_bounded_across_gulpers() -> Result<()> {
    init_tracing();
    let (registry, _cache) = test_registry(single_fetch_config());
    let source = MockSource::new("iris");
    let gate = source.pause_at(0.0);

    let (_first, mut rx1) = start_gulper(&registry, &source, "CH1", 0.0, 1800.0).await?;
    gate.wait_until_paused(EVENT_TIMEOUT).await?;
    let (_second, mut rx2) = start_gulper(&registry, &source, "CH2", 3600.0, 5400.0).await?;

    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        source.requested_windows(),
        vec![window(0.0, 1800.0)],
        "second gulper must wait for the only fetch slot"
    );

    gate.release();
    collect_until_terminal(&mut rx1).await?;
    collect_until_terminal(&mut rx2).await?;
    assert_eq!(source.requests().len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kill_while_queued_for_a_fetch_slot() -> Result<()> {
    let (registry, _cache) = test_registry(single_fetch_config());
    let source = MockSource::new("iris");
    let gate = source.pause_at(0.0);

    let (_first, mut rx1) = start_gulper(&registry, &source, "CH1", 0.0, 1800.0).await?;
    gate.wait_until_paused(EVENT_TIMEOUT).await?;
    let (second, mut rx2) = start_gulper(&registry, &source, "CH2", 3600.0, 5400.0).await?;

    assert!(registry.kill(second.key()));
    match next_event(&mut rx2).await? {
        GulpEvent::Cancelled { coverage, .. } => assert!(coverage.is_empty()),
        other => bail!("expected cancellation, got {other:?}"),
    }
    assert_eq!(second.wait().await, GulperStatus::Killed);
    assert_eq!(source.requests().len(), 1);

    gate.release();
    let events = collect_until_terminal(&mut rx1).await?;
    assert!(matches!(events.last(), Some(GulpEvent::Done { .. })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_kills_live_gulpers_and_refuses_requests() -> Result<()> {
    init_tracing();
    let (registry, _cache) = test_registry(test_config());
    let source = MockSource::new("iris");
    let gate = source.pause_at(1800.0);

    let (handle, mut rx) = start_gulper(&registry, &source, "CH1", 0.0, 5400.0).await?;
    assert!(matches!(next_event(&mut rx).await?, GulpEvent::Chunk { .. }));
    gate.wait_until_paused(EVENT_TIMEOUT).await?;

    let shutdown = tokio::spawn({
        let registry = registry.clone();
        async move { registry.shutdown().await }
    });
    sleep(Duration::from_millis(20)).await;
    assert!(!shutdown.is_finished(), "in-flight fetches are not interrupted");

    gate.release();
    timeout(EVENT_TIMEOUT, shutdown).await??;

    let rest = collect_until_terminal(&mut rx).await?;
    assert_eq!(chunk_windows(&rest), vec![window(1800.0, 3600.0)]);
    assert!(matches!(
        rest.last(),
        Some(GulpEvent::Cancelled { coverage, .. }) if *coverage == window(0.0, 3600.0)
    ));
    assert_eq!(handle.status(), GulperStatus::Killed);
    assert!(registry.is_empty());

    let refused = start_gulper(&registry, &source, "CH1", 0.0, 5400.0).await;
    assert!(refused.is_err());
    Ok(())
}

#[tokio::test]
async fn external_token_cancels_every_gulper() -> Result<()> {
    let shutdown = CancellationToken::new();
    let registry = GulperRegistry::with_cancellation_token(
        test_config(),
        std::sync::Arc::new(MemoryCache::new()),
        shutdown.clone(),
    );
    let source = MockSource::new("iris");
    let gate = source.pause_at(0.0);

    let (handle, mut rx) = start_gulper(&registry, &source, "CH1", 0.0, 5400.0).await?;
    gate.wait_until_paused(EVENT_TIMEOUT).await?;
    shutdown.cancel();
    gate.release();

    let events = collect_until_terminal(&mut rx).await?;
    assert!(matches!(events.last(), Some(GulpEvent::Cancelled { .. })));
    assert_eq!(handle.wait().await, GulperStatus::Killed);
    Ok(())
}

#[tokio::test]
async fn cancelled_external_token_refuses_new_gulpers() -> Result<()> {
    let shutdown = CancellationToken::new();
    let registry = GulperRegistry::with_cancellation_token(
        test_config(),
        std::sync::Arc::new(MemoryCache::new()),
        shutdown.clone(),
    );
    let source = MockSource::new("iris");
    shutdown.cancel();

    assert!(request_with_channel(&registry, &source, "CH1", 0.0, 5400.0)
        .await
        .is_err());
    assert!(request_with_channel(&registry, &source, "CH1", 0.0, 60.0)
        .await
        .is_err());
    assert!(registry.is_empty());
    assert!(source.requests().is_empty());
    assert_eq!(registry.telemetry().snapshot().gulpers_started, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_key_share_a_gulper() -> Result<()> {
    const CALLERS: usize = 16;

    init_tracing();
    let (registry, _cache) = test_registry(test_config());
    let source = MockSource::new("iris");
    let gate = source.pause_at(0.0);

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let registry = registry.clone();
            let source = source.clone();
            tokio::spawn(async move {
                request_with_channel(&registry, &source, "CH1", 0.0, 3600.0).await
            })
        })
        .collect();

    let mut started = Vec::new();
    let mut extended = Vec::new();
    for task in tasks {
        match task.await?? {
            (GulpResponse::Started(handle), rx) => started.push((handle, rx)),
            (GulpResponse::Extended(handle), _) => extended.push(handle),
            (other, _) => bail!("unexpected response {other:?}"),
        }
    }

    assert_eq!(started.len(), 1);
    assert_eq!(extended.len(), CALLERS - 1);
    assert_eq!(registry.len(), 1);
    let (handle, mut rx) = started.pop().expect("one gulper started");
    assert!(extended.iter().all(|other| other.same_gulper(&handle)));

    gate.wait_until_paused(EVENT_TIMEOUT).await?;
    gate.release();

    let events = collect_until_terminal(&mut rx).await?;
    assert_eq!(
        chunk_windows(&events),
        vec![window(0.0, 1800.0), window(1800.0, 3600.0)]
    );
    assert_eq!(handle.wait().await, GulperStatus::Done);
    assert_eq!(source.requests().len(), 2);
    assert_eq!(registry.telemetry().snapshot().gulpers_started, 1);
    Ok(())
}

#[tokio::test]
async fn metrics_reporter_stops_on_shutdown() -> Result<()> {
    let config = GulpConfig::builder()
        .metrics_interval(Duration::from_millis(5))
        .build()?;
    let (registry, _cache) = test_registry(config);

    let reporter = registry.spawn_metrics_reporter();
    sleep(Duration::from_millis(20)).await;
    registry.shutdown().await;

    timeout(EVENT_TIMEOUT, reporter).await??;
    Ok(())
}
