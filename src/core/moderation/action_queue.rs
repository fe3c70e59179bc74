// Serialized moderation queue.
//
// One consumer task runs queued jobs strictly in submission order, one at a
// time, and waits a fixed delay after each job before starting the next.
// Callers get the job's output back through a oneshot channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

type BoxedJob = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Why a queued job did not hand back a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is shut down")]
    Closed,
    #[error("queued job aborted before settling")]
    Aborted,
}

pub struct ModerationQueue {
    tx: mpsc::UnboundedSender<BoxedJob>,
    pending: Arc<AtomicUsize>,
}

impl ModerationQueue {
    /// Start the consumer task. Must be called inside a tokio runtime.
    pub fn spawn(delay: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxedJob>();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pending);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // Each job runs in its own task so a panic only loses that job.
                if let Err(e) = tokio::spawn(job()).await {
                    tracing::error!(error = %e, "Moderation job panicked");
                }
                counter.fetch_sub(1, Ordering::SeqCst);
                sleep(delay).await;
            }
            tracing::debug!("Moderation queue consumer stopped");
        });

        Self { tx, pending }
    }

    /// Enqueue a job and wait for its output.
    pub async fn run<T, F, Fut>(&self, job: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let boxed: BoxedJob = Box::new(move || {
            Box::pin(async move {
                let output = job().await;
                let _ = result_tx.send(output);
            })
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(boxed).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }

        result_rx.await.map_err(|_| QueueError::Aborted)
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn jobs_run_in_order_with_spacing() {
        let delay = Duration::from_millis(350);
        let queue = Arc::new(ModerationQueue::spawn(delay));
        let log: Arc<Mutex<Vec<(usize, Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                queue
                    .run(move || async move {
                        let started = Instant::now();
                        sleep(Duration::from_millis(20)).await;
                        log.lock().unwrap().push((i, started, Instant::now()));
                        i
                    })
                    .await
            }));
            // Make submission order deterministic.
            tokio::task::yield_now().await;
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Ok(i));
        }

        let log = log.lock().unwrap();
        let order: Vec<usize> = log.iter().map(|(i, _, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        for pair in log.windows(2) {
            let (_, _, finished) = pair[0];
            let (_, next_started, _) = pair[1];
            assert!(next_started.duration_since(finished) >= delay);
        }
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_job_in_flight() {
        let queue = Arc::new(ModerationQueue::spawn(Duration::from_millis(1)));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = Arc::clone(&queue);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                queue
                    .run(move || async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_does_not_stop_the_queue() {
        let queue = ModerationQueue::spawn(Duration::from_millis(1));

        let failed: Result<(), QueueError> = queue
            .run(|| async {
                panic!("boom");
            })
            .await;
        assert_eq!(failed, Err(QueueError::Aborted));

        let ok = queue.run(|| async { 42 }).await;
        assert_eq!(ok, Ok(42));
    }
}
