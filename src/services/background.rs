use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Default queue depth; overflow drops the task with a warning.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Bounded queue for fire-and-forget work (message persistence, image
/// uploads, telemetry, cache write-behind).
///
/// Tasks run sequentially in submission order, so dependent work (save
/// the message row, then persist its images) can simply be enqueued in
/// order. Failures are logged and dropped; they must never undo a chat
/// turn already shown to the user.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<Task>,
}

impl BackgroundQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Task>(capacity);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
            debug!("background queue drained, worker exiting");
        });
        Self { tx }
    }

    /// Enqueue a fallible task. A full queue drops the task.
    pub fn enqueue<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task: Task = Box::pin(async move {
            if let Err(error) = future.await {
                warn!(task = label, error = ?error, "background task failed");
            }
        });
        if self.tx.try_send(task).is_err() {
            warn!(task = label, "background queue full, dropping task");
        }
    }

    /// Wait until every task enqueued before this call has finished.
    /// Used for orderly shutdown and deterministic tests.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let marker: Task = Box::pin(async move {
            let _ = done_tx.send(());
        });
        if self.tx.send(marker).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl Default for BackgroundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let queue = BackgroundQueue::new(8);
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let log = log.clone();
            queue.enqueue("ordered", async move {
                log.lock().push(i);
                Ok(())
            });
        }
        queue.flush().await;

        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let queue = BackgroundQueue::new(8);
        let ran_after = Arc::new(AtomicUsize::new(0));

        queue.enqueue("failing", async { anyhow::bail!("boom") });
        let counter = ran_after.clone();
        queue.enqueue("after-failure", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        queue.flush().await;

        assert_eq!(ran_after.load(Ordering::SeqCst), 1);
    }
}
