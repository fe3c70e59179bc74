// Audit queue - paced, rate-limit aware delivery of audit log entries.
//
// One message is in flight at a time. Consecutive successful sends start at
// least `spacing` apart. A rate-limited send sleeps for the retry-after and is
// put back at the FRONT of the backlog, so it is never dropped and never
// overtaken by messages queued after it.
//
// When the audit channel refuses a message, the same text is fanned out as
// direct messages to every configured admin, through this same queue.

use super::moderation_errors::{classify, ApiError, ApiFailure};
use super::moderation_models::AuditEntry;
use super::moderation_ports::{PlatformClient, SendOptions};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};

#[derive(Debug, Clone)]
pub struct AuditQueueConfig {
    pub audit_chat_id: Option<u64>,
    pub admin_ids: Vec<u64>,
    /// Minimum gap between the starts of two successful sends.
    pub spacing: Duration,
}

/// Final state of one submitted audit message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDelivery {
    Delivered,
    /// The audit channel failed; copies were queued for each admin.
    FellBack,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    AuditChannel,
    Admin(u64),
}

struct AuditTask {
    destination: Destination,
    text: String,
    done: Option<oneshot::Sender<AuditDelivery>>,
}

pub struct AuditQueue {
    tx: mpsc::UnboundedSender<AuditTask>,
    pending: Arc<AtomicUsize>,
}

impl AuditQueue {
    /// Start the consumer task. Must be called inside a tokio runtime.
    pub fn spawn(platform: Arc<dyn PlatformClient>, config: AuditQueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = AuditWorker {
            platform,
            config,
            pending: Arc::clone(&pending),
            backlog: VecDeque::new(),
            last_success_start: None,
        };
        tokio::spawn(worker.run(rx));

        Self { tx, pending }
    }

    /// Queue a message for the audit channel. The receiver settles once the
    /// message is delivered, handed to the admin fallback, or given up on.
    pub fn submit(&self, text: impl Into<String>) -> oneshot::Receiver<AuditDelivery> {
        let (done_tx, done_rx) = oneshot::channel();
        let task = AuditTask {
            destination: Destination::AuditChannel,
            text: text.into(),
            done: Some(done_tx),
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Audit queue is closed, dropping entry");
            if let Some(done) = task.done {
                let _ = done.send(AuditDelivery::Failed);
            }
        }
        done_rx
    }

    /// Fire-and-forget helper for structured entries.
    pub fn log(&self, entry: &AuditEntry) {
        let _ = self.submit(entry.render());
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct AuditWorker {
    platform: Arc<dyn PlatformClient>,
    config: AuditQueueConfig,
    pending: Arc<AtomicUsize>,
    backlog: VecDeque<AuditTask>,
    last_success_start: Option<Instant>,
}

impl AuditWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AuditTask>) {
        loop {
            while let Ok(task) = rx.try_recv() {
                self.backlog.push_back(task);
            }

            let task = match self.backlog.pop_front() {
                Some(task) => task,
                None => match rx.recv().await {
                    Some(task) => task,
                    None => break,
                },
            };

            self.process(task).await;
        }
        tracing::debug!("Audit queue consumer stopped");
    }

    async fn process(&mut self, task: AuditTask) {
        if task.destination == Destination::AuditChannel && self.config.audit_chat_id.is_none() {
            self.fan_out(task);
            return;
        }

        if let Some(previous) = self.last_success_start {
            sleep_until(previous + self.config.spacing).await;
        }

        let started = Instant::now();
        match self.send(&task).await {
            Ok(()) => {
                self.last_success_start = Some(started);
                self.settle(task, AuditDelivery::Delivered);
            }
            Err(err) => match classify(&err) {
                ApiFailure::RateLimited(wait) => {
                    tracing::warn!(
                        retry_after_ms = wait.as_millis() as u64,
                        "Audit send rate limited, requeueing at front"
                    );
                    sleep(wait).await;
                    self.backlog.push_front(task);
                }
                failure => match task.destination {
                    Destination::AuditChannel => {
                        tracing::warn!(error = %failure, "Audit channel send failed, falling back to admins");
                        self.fan_out(task);
                    }
                    Destination::Admin(admin_id) => {
                        tracing::warn!(admin_id, error = %failure, "Audit DM to admin failed");
                        self.settle(task, AuditDelivery::Failed);
                    }
                },
            },
        }
    }

    /// Each send runs in its own task so a panic only loses that send.
    async fn send(&self, task: &AuditTask) -> Result<(), ApiError> {
        let platform = Arc::clone(&self.platform);
        let audit_chat_id = self.config.audit_chat_id;
        let destination = task.destination;
        let text = task.text.clone();

        match tokio::spawn(async move {
            deliver(platform.as_ref(), audit_chat_id, destination, &text).await
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Audit send panicked");
                Err(ApiError::new(0, format!("audit send panicked: {e}")))
            }
        }
    }

    /// Queue one DM per admin right at the front, keeping admin order.
    fn fan_out(&mut self, task: AuditTask) {
        if self.config.admin_ids.is_empty() {
            tracing::warn!("No admins configured for audit fallback, entry dropped");
            self.settle(task, AuditDelivery::Failed);
            return;
        }

        for admin_id in self.config.admin_ids.iter().rev() {
            self.backlog.push_front(AuditTask {
                destination: Destination::Admin(*admin_id),
                text: task.text.clone(),
                done: None,
            });
        }
        self.settle(task, AuditDelivery::FellBack);
    }

    fn settle(&self, task: AuditTask, delivery: AuditDelivery) {
        if let Some(done) = task.done {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(delivery);
        }
    }
}

async fn deliver(
    platform: &dyn PlatformClient,
    audit_chat_id: Option<u64>,
    destination: Destination,
    text: &str,
) -> Result<(), ApiError> {
    match destination {
        Destination::AuditChannel => {
            let chat_id =
                audit_chat_id.ok_or_else(|| ApiError::new(400, "no audit channel configured"))?;
            platform
                .send_message(chat_id, text, SendOptions { silent: true })
                .await
        }
        Destination::Admin(user_id) => platform.send_direct_message(user_id, text).await,
    }
}
