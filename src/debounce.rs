//! # Debounced Writes
//!
//! Coalesces a burst of values into a single call after a quiet period.
//! Each [`Debouncer::push`] replaces the pending value and restarts the
//! timer; when the timer fires the sink receives the latest value only.
//!
//! The sink runs on a background task, one call at a time, so writes reach
//! the collaborator in push order. [`Debouncer::flush`] runs the pending
//! value immediately and waits for it; dropping the debouncer flushes too.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

enum Command<T> {
    Push(T),
    Flush(oneshot::Sender<()>),
    Cancel,
}

/// Handle to a debounce task. Must be created inside a tokio runtime.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    delay: Duration,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(delay: Duration, sink: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, delay, sink));
        Self { tx, delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending value and restart the quiet period.
    pub fn push(&self, value: T) {
        let _ = self.tx.send(Command::Push(value));
    }

    /// Run the pending value now, if any, and wait until the sink returns.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Drop the pending value without calling the sink.
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel);
    }
}

async fn run<T, F, Fut>(mut rx: mpsc::UnboundedReceiver<Command<T>>, delay: Duration, sink: F)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut pending: Option<T> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Push(value)) => {
                    pending = Some(value);
                    deadline = Instant::now() + delay;
                }
                Some(Command::Flush(ack)) => {
                    if let Some(value) = pending.take() {
                        debug!("flushing debounced write");
                        sink(value).await;
                    }
                    let _ = ack.send(());
                }
                Some(Command::Cancel) => {
                    if pending.take().is_some() {
                        debug!("cancelled debounced write");
                    }
                }
                None => {
                    // Handle dropped: write out whatever is left.
                    if let Some(value) = pending.take() {
                        debug!("flushing debounced write on close");
                        sink(value).await;
                    }
                    break;
                }
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                if let Some(value) = pending.take() {
                    sink(value).await;
                }
            }
        }
    }
}
