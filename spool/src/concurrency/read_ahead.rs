//! Bounded read-ahead over lazily produced sequences.
//!
//! [`ReadAhead`] drains a caller supplied iterator on a dedicated producer thread into a queue,
//! so a slow consumer and a slow source overlap instead of waiting on each other. With a bounded
//! [`MaxAhead`] the producer blocks once the queue holds `max_ahead` items and resumes as soon as
//! the consumer takes one, which caps memory use for arbitrarily long sources.
//!
//! The queue is a tokio `mpsc` channel. Items are the only thing travelling through it; the
//! producer's final outcome (finished, failed, canceled) is recorded separately before the
//! channel closes, so the consumer always sees every produced item before the outcome.
//!
//! Consumers on plain threads use the blocking [`Iterator`] implementation. Async consumers use
//! the [`Stream`] implementation instead; iterating from inside a tokio runtime panics, as for
//! any blocking tokio channel operation.

use std::convert::Infallible;
use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::{BoxFuture, FutureExt};
use metrics::counter;
use spool_config::shared::ReadAheadConfig;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SpoolResult};
use crate::metrics::{
    OUTCOME_LABEL, PIPELINE_LABEL, SPOOL_READ_AHEAD_PRODUCERS_FINISHED_TOTAL,
    SPOOL_READ_AHEAD_STALLS_TOTAL,
};
use crate::spool_error;

/// Depths above this are treated as unbounded, tokio channels cannot allocate more permits.
const MAX_BOUNDED_DEPTH: usize = usize::MAX >> 4;

/// Maximum number of produced but not yet consumed items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MaxAhead {
    /// The producer blocks once this many items are queued.
    Bounded(NonZeroUsize),
    /// The producer never waits for the consumer.
    #[default]
    Unbounded,
}

impl MaxAhead {
    /// Returns a bounded depth, or `None` for zero.
    pub fn bounded(max_ahead: usize) -> Option<MaxAhead> {
        NonZeroUsize::new(max_ahead).map(MaxAhead::Bounded)
    }

    /// Builds the depth described by a validated [`ReadAheadConfig`].
    pub fn from_config(config: &ReadAheadConfig) -> SpoolResult<MaxAhead> {
        config.validate()?;

        Ok(config
            .max_ahead
            .and_then(MaxAhead::bounded)
            .unwrap_or(MaxAhead::Unbounded))
    }
}

impl From<NonZeroUsize> for MaxAhead {
    fn from(max_ahead: NonZeroUsize) -> Self {
        MaxAhead::Bounded(max_ahead)
    }
}

/// Transitions observable on a read-ahead pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAheadEvent {
    /// The consumer found the queue empty while the producer was still running.
    QueueRanEmpty,
    /// The consumer received its first item after the queue ran empty.
    ResumedAfterEmpty,
    /// The source was exhausted after producing `items` items.
    ProducerFinished { items: u64 },
    /// The source failed after producing `items` items.
    ProducerFailed { items: u64 },
}

/// Receives [`ReadAheadEvent`]s.
///
/// Queue events are delivered on the consumer's thread, producer events on the producer thread,
/// so implementations must not block.
pub trait ReadAheadObserver: Send + Sync {
    fn on_event(&self, event: ReadAheadEvent);
}

impl<F> ReadAheadObserver for F
where
    F: Fn(ReadAheadEvent) + Send + Sync,
{
    fn on_event(&self, event: ReadAheadEvent) {
        self(event)
    }
}

/// How the producer ended. Recorded before the queue closes.
#[derive(Debug)]
enum ProducerOutcome {
    Finished,
    Failed(crate::error::SpoolError),
    Canceled,
    ConsumerGone,
}

/// Producer half of the queue.
enum QueueTx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> QueueTx<T> {
    /// Enqueues an item, blocking while a bounded queue is full.
    ///
    /// Returns `false` once the consumer is gone.
    fn push(&self, item: T) -> bool {
        match self {
            QueueTx::Bounded(tx) => tx.blocking_send(item).is_ok(),
            QueueTx::Unbounded(tx) => tx.send(item).is_ok(),
        }
    }
}

/// Consumer half of the queue.
enum QueueRx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> QueueRx<T> {
    fn try_pop(&mut self) -> Result<T, TryRecvError> {
        match self {
            QueueRx::Bounded(rx) => rx.try_recv(),
            QueueRx::Unbounded(rx) => rx.try_recv(),
        }
    }

    fn pop_blocking(&mut self) -> Option<T> {
        match self {
            QueueRx::Bounded(rx) => rx.blocking_recv(),
            QueueRx::Unbounded(rx) => rx.blocking_recv(),
        }
    }

    fn poll_pop(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self {
            QueueRx::Bounded(rx) => rx.poll_recv(cx),
            QueueRx::Unbounded(rx) => rx.poll_recv(cx),
        }
    }

    fn len(&self) -> usize {
        match self {
            QueueRx::Bounded(rx) => rx.len(),
            QueueRx::Unbounded(rx) => rx.len(),
        }
    }
}

fn queue<T>(max_ahead: MaxAhead) -> (QueueTx<T>, QueueRx<T>) {
    match max_ahead {
        MaxAhead::Bounded(depth) if depth.get() <= MAX_BOUNDED_DEPTH => {
            let (tx, rx) = mpsc::channel(depth.get());
            (QueueTx::Bounded(tx), QueueRx::Bounded(rx))
        }
        _ => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueTx::Unbounded(tx), QueueRx::Unbounded(rx))
        }
    }
}

/// State shared between the producer thread and the consumer.
struct Shared {
    name: String,
    outcome: OnceLock<ProducerOutcome>,
    observer: Option<Arc<dyn ReadAheadObserver>>,
}

impl Shared {
    fn notify(&self, event: ReadAheadEvent) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(event);
        }
    }
}

/// Configures and starts a [`ReadAhead`].
pub struct ReadAheadBuilder<I> {
    source: I,
    max_ahead: MaxAhead,
    thread_name: String,
    name: Option<String>,
    shutdown_rx: Option<ShutdownRx>,
    observer: Option<Arc<dyn ReadAheadObserver>>,
}

impl<I, T, E> ReadAheadBuilder<I>
where
    I: IntoIterator<Item = Result<T, E>>,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
    E: Error + Send + Sync + 'static,
{
    fn new(source: I) -> Self {
        Self {
            source,
            max_ahead: MaxAhead::Unbounded,
            thread_name: ReadAheadConfig::DEFAULT_THREAD_NAME.to_string(),
            name: None,
            shutdown_rx: None,
            observer: None,
        }
    }

    /// Sets the look-ahead depth. Defaults to [`MaxAhead::Unbounded`].
    pub fn max_ahead(mut self, max_ahead: MaxAhead) -> Self {
        self.max_ahead = max_ahead;
        self
    }

    /// Applies depth and thread name from a configuration section.
    pub fn with_config(mut self, config: &ReadAheadConfig) -> SpoolResult<Self> {
        self.max_ahead = MaxAhead::from_config(config)?;
        self.thread_name = config.thread_name.clone();

        Ok(self)
    }

    /// Sets the name used in logs and metric labels. Defaults to the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stops the producer and fails the next pull once `shutdown_rx` fires.
    pub fn shutdown(mut self, shutdown_rx: ShutdownRx) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Registers an observer for queue and producer transitions.
    pub fn observer(mut self, observer: impl ReadAheadObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Spawns the producer thread and returns the consuming side.
    pub fn spawn(self) -> SpoolResult<ReadAhead<T>> {
        let shared = Arc::new(Shared {
            name: self.name.unwrap_or_else(|| self.thread_name.clone()),
            outcome: OnceLock::new(),
            observer: self.observer,
        });

        let (tx, rx) = queue(self.max_ahead);
        let source = self.source.into_iter();
        let producer_shared = shared.clone();
        let producer_shutdown_rx = self.shutdown_rx.clone();

        std::thread::Builder::new()
            .name(self.thread_name)
            .spawn(move || produce(source, tx, producer_shutdown_rx, producer_shared))
            .map_err(|err| {
                spool_error!(
                    ErrorKind::WorkerSpawnFailed,
                    "Failed to spawn read-ahead producer thread",
                    source: err
                )
            })?;

        debug!(pipeline = %shared.name, max_ahead = ?self.max_ahead, "read-ahead started");

        Ok(ReadAhead {
            rx,
            shared,
            shutdown_rx: self.shutdown_rx,
            shutdown_wait: None,
            stalled: false,
            terminated: false,
        })
    }
}

/// Producer loop: pulls the source into the queue until it ends, fails, or nobody listens.
fn produce<S, T, E>(
    mut source: S,
    tx: QueueTx<T>,
    shutdown_rx: Option<ShutdownRx>,
    shared: Arc<Shared>,
) where
    S: Iterator<Item = Result<T, E>>,
    E: Error + Send + Sync + 'static,
{
    let mut produced: u64 = 0;

    let outcome = loop {
        if shutdown_rx.as_ref().is_some_and(ShutdownRx::is_shutdown) {
            debug!(pipeline = %shared.name, produced, "read-ahead producer stopped by shutdown");
            break ProducerOutcome::Canceled;
        }

        match source.next() {
            Some(Ok(item)) => {
                if !tx.push(item) {
                    debug!(pipeline = %shared.name, produced, "read-ahead consumer dropped");
                    break ProducerOutcome::ConsumerGone;
                }
                produced += 1;
            }
            Some(Err(err)) => {
                warn!(pipeline = %shared.name, produced, error = %err, "read-ahead source failed");
                counter!(
                    SPOOL_READ_AHEAD_PRODUCERS_FINISHED_TOTAL,
                    PIPELINE_LABEL => shared.name.clone(),
                    OUTCOME_LABEL => "failed"
                )
                .increment(1);
                shared.notify(ReadAheadEvent::ProducerFailed { items: produced });

                break ProducerOutcome::Failed(spool_error!(
                    ErrorKind::SourceFailed,
                    "Read-ahead source failed",
                    format!("source failed after {produced} items"),
                    source: err
                ));
            }
            None => {
                debug!(pipeline = %shared.name, produced, "read-ahead source exhausted");
                counter!(
                    SPOOL_READ_AHEAD_PRODUCERS_FINISHED_TOTAL,
                    PIPELINE_LABEL => shared.name.clone(),
                    OUTCOME_LABEL => "finished"
                )
                .increment(1);
                shared.notify(ReadAheadEvent::ProducerFinished { items: produced });

                break ProducerOutcome::Finished;
            }
        }
    };

    // The outcome must be visible before the channel closes.
    let _ = shared.outcome.set(outcome);
    drop(tx);
}

/// A lazily consumed sequence filled ahead of time by a background producer.
///
/// Yields the source's items in order, then ends. A source error is yielded once as
/// [`ErrorKind::SourceFailed`] after the items produced before it, and nothing follows it.
pub struct ReadAhead<T> {
    rx: QueueRx<T>,
    shared: Arc<Shared>,
    shutdown_rx: Option<ShutdownRx>,
    /// Wakes a pending [`Stream`] consumer on shutdown. Created on first poll.
    shutdown_wait: Option<BoxFuture<'static, ()>>,
    stalled: bool,
    terminated: bool,
}

impl<T> ReadAhead<T> {
    /// Starts configuring a read-ahead over a fallible source.
    pub fn builder<I, E>(source: I) -> ReadAheadBuilder<I>
    where
        I: IntoIterator<Item = Result<T, E>>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        ReadAheadBuilder::new(source)
    }

    /// Wraps a fallible source with the given look-ahead depth.
    pub fn wrap<I, E>(source: I, max_ahead: MaxAhead) -> SpoolResult<ReadAhead<T>>
    where
        I: IntoIterator<Item = Result<T, E>>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        Self::builder(source).max_ahead(max_ahead).spawn()
    }

    /// Returns the number of items produced but not consumed yet.
    pub fn read_ahead_count(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` once the sequence ended or surfaced its error.
    pub fn is_finished(&self) -> bool {
        self.terminated
    }

    /// Returns the pipeline name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn is_canceled(&self) -> bool {
        self.shutdown_rx
            .as_ref()
            .is_some_and(ShutdownRx::is_shutdown)
    }

    /// Polls for shutdown, registering the task to be woken once it fires.
    fn poll_canceled(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(shutdown_rx) = self.shutdown_rx.as_ref() else {
            return false;
        };

        let shutdown_wait = self.shutdown_wait.get_or_insert_with(|| {
            let mut shutdown_rx = shutdown_rx.clone();
            async move { shutdown_rx.wait_for_shutdown().await }.boxed()
        });

        shutdown_wait.poll_unpin(cx).is_ready()
    }

    fn cancel(&mut self) -> Option<SpoolResult<T>> {
        self.terminated = true;
        debug!(pipeline = %self.shared.name, "read-ahead canceled");

        Some(Err(spool_error!(
            ErrorKind::Canceled,
            "Read-ahead was canceled"
        )))
    }

    fn mark_stalled(&mut self) {
        if self.stalled {
            return;
        }

        self.stalled = true;
        counter!(
            SPOOL_READ_AHEAD_STALLS_TOTAL,
            PIPELINE_LABEL => self.shared.name.clone()
        )
        .increment(1);
        debug!(pipeline = %self.shared.name, "read-ahead queue ran empty");
        self.shared.notify(ReadAheadEvent::QueueRanEmpty);
    }

    /// Turns a queue pop into the consumer's result. `None` means the producer is done.
    fn on_popped(&mut self, popped: Option<T>) -> Option<SpoolResult<T>> {
        match popped {
            Some(item) => {
                if self.stalled {
                    self.stalled = false;
                    debug!(pipeline = %self.shared.name, "read-ahead queue resumed");
                    self.shared.notify(ReadAheadEvent::ResumedAfterEmpty);
                }

                Some(Ok(item))
            }
            None => self.finish(),
        }
    }

    /// Surfaces the recorded producer outcome once the queue is closed and drained.
    fn finish(&mut self) -> Option<SpoolResult<T>> {
        self.terminated = true;

        match self.shared.outcome.get() {
            Some(ProducerOutcome::Finished) => None,
            Some(ProducerOutcome::Failed(err)) => Some(Err(err.clone())),
            Some(ProducerOutcome::Canceled) => Some(Err(spool_error!(
                ErrorKind::Canceled,
                "Read-ahead was canceled"
            ))),
            Some(ProducerOutcome::ConsumerGone) | None => Some(Err(spool_error!(
                ErrorKind::ProducerLost,
                "Read-ahead producer stopped without finishing",
                self.shared.name.clone()
            ))),
        }
    }
}

impl<T> Iterator for ReadAhead<T> {
    type Item = SpoolResult<T>;

    /// Blocks while the queue is empty and the producer is still running.
    fn next(&mut self) -> Option<Self::Item> {
        if self.terminated {
            return None;
        }

        if self.is_canceled() {
            return self.cancel();
        }

        let popped = match self.rx.try_pop() {
            Ok(item) => Some(item),
            Err(TryRecvError::Disconnected) => None,
            Err(TryRecvError::Empty) => {
                self.mark_stalled();
                self.rx.pop_blocking()
            }
        };

        self.on_popped(popped)
    }
}

impl<T> Stream for ReadAhead<T> {
    type Item = SpoolResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.terminated {
            return Poll::Ready(None);
        }

        if this.poll_canceled(cx) {
            return Poll::Ready(this.cancel());
        }

        match this.rx.poll_pop(cx) {
            Poll::Pending => {
                this.mark_stalled();
                Poll::Pending
            }
            Poll::Ready(popped) => Poll::Ready(this.on_popped(popped)),
        }
    }
}

impl<T> fmt::Debug for ReadAhead<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadAhead")
            .field("name", &self.shared.name)
            .field("read_ahead_count", &self.read_ahead_count())
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// Read-ahead for infallible iterators.
pub trait ReadAheadExt: Iterator + Send + Sized + 'static {
    /// Starts reading this iterator ahead on a background thread.
    fn read_ahead(self, max_ahead: MaxAhead) -> SpoolResult<ReadAhead<Self::Item>>
    where
        Self::Item: Send + 'static,
    {
        ReadAhead::wrap(self.map(Ok::<Self::Item, Infallible>), max_ahead)
    }
}

impl<I> ReadAheadExt for I where I: Iterator + Send + 'static {}

/// Read-ahead for iterators of results.
pub trait TryReadAheadExt<T, E>: Iterator<Item = Result<T, E>> + Send + Sized + 'static
where
    T: Send + 'static,
    E: Error + Send + Sync + 'static,
{
    /// Starts reading this iterator ahead; the first `Err` ends production.
    fn try_read_ahead(self, max_ahead: MaxAhead) -> SpoolResult<ReadAhead<T>> {
        ReadAhead::wrap(self, max_ahead)
    }
}

impl<I, T, E> TryReadAheadExt<T, E> for I
where
    I: Iterator<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Error + Send + Sync + 'static,
{
}
