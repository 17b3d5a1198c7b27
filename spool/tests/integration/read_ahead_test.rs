use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spool::concurrency::read_ahead::{MaxAhead, ReadAhead, TryReadAheadExt};
use spool::concurrency::shutdown::create_shutdown_channel;
use spool::error::{ErrorKind, SpoolResult};
use spool::test_utils::scratch::ScratchDir;
use spool_config::load_config_from;
use spool_config::shared::SpoolConfig;
use spool_telemetry::tracing::init_test_tracing;

/// Pulls the next item through the async interface.
async fn next_async<T>(rows: &mut ReadAhead<T>) -> Option<SpoolResult<T>> {
    futures::StreamExt::next(rows).await
}

#[test]
fn configured_pipeline_respects_loaded_depth() {
    init_test_tracing();
    let scratch = ScratchDir::new();
    std::fs::write(
        scratch.path().join("base.yaml"),
        "read_ahead:\n  max_ahead: 3\n  thread_name: rows-reader\n",
    )
    .unwrap();
    let config: SpoolConfig = load_config_from(scratch.path()).unwrap();

    let pulled = Arc::new(AtomicUsize::new(0));
    let source_pulled = pulled.clone();
    let source = (0..50).map(move |row| {
        source_pulled.fetch_add(1, Ordering::SeqCst);
        Ok::<_, Infallible>(row)
    });

    let mut rows = ReadAhead::builder(source)
        .with_config(&config.read_ahead)
        .unwrap()
        .spawn()
        .unwrap();
    assert_eq!(rows.name(), "rows-reader");

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rows.read_ahead_count(), 3);
    assert!(pulled.load(Ordering::SeqCst) <= 4);

    let mut received = Vec::new();
    for row in &mut rows {
        received.push(row.unwrap());
    }
    assert_eq!(received, (0..50).collect::<Vec<_>>());
    assert!(rows.is_finished());
}

#[tokio::test(flavor = "multi_thread")]
async fn async_consumer_sees_items_before_the_failure() {
    init_test_tracing();
    let source = (1..=4).map(|i| {
        if i == 3 {
            Err(std::io::Error::other("row 3 is corrupt"))
        } else {
            Ok(i)
        }
    });

    let mut rows = source.try_read_ahead(MaxAhead::bounded(2).unwrap()).unwrap();

    assert_eq!(next_async(&mut rows).await.unwrap().unwrap(), 1);
    assert_eq!(next_async(&mut rows).await.unwrap().unwrap(), 2);
    let err = next_async(&mut rows).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceFailed);
    assert!(err.to_string().contains("row 3 is corrupt"));
    assert!(next_async(&mut rows).await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_between_pulls_cancels_async_consumer() {
    init_test_tracing();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let slow = (0u32..).map(|i| {
        std::thread::sleep(Duration::from_millis(20));
        Ok::<_, Infallible>(i)
    });

    let mut rows = ReadAhead::builder(slow)
        .max_ahead(MaxAhead::bounded(1).unwrap())
        .shutdown(shutdown_rx)
        .spawn()
        .unwrap();

    assert_eq!(next_async(&mut rows).await.unwrap().unwrap(), 0);
    shutdown_tx.shutdown();

    let err = next_async(&mut rows).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert!(next_async(&mut rows).await.is_none());
}
