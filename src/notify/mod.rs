use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default maximum number of undispatched events
const DEFAULT_MAX_QUEUE_SIZE: usize = 256;

/// Maximum events drained per dispatcher tick
const DRAIN_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    PositionUpdated,
    MintingUpdate,
    ChallengeOpened,
    BidTaken,
    MinterProposed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::PositionUpdated => "position-updated",
            ChangeKind::MintingUpdate => "minting-update",
            ChangeKind::ChallengeOpened => "challenge-opened",
            ChangeKind::BidTaken => "bid-taken",
            ChangeKind::MinterProposed => "minter-proposed",
        };
        f.write_str(name)
    }
}

/// Lightweight record of a cache change, handed off to the dispatcher.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub key: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

/// Bounded queue decoupling sync commits from notification dispatch.
///
/// Publishing never blocks the sync path: when the queue is full the event
/// is dropped with a warning. Notifications are best-effort.
pub struct ChangeQueue {
    queue: Arc<SegQueue<ChangeEvent>>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        info!("Creating change queue with capacity {}", max_size);
        Self {
            queue: Arc::new(SegQueue::new()),
            semaphore: Arc::new(Semaphore::new(max_size)),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.max_size - self.semaphore.available_permits()
    }

    pub fn is_empty(&self) -> bool {
        self.semaphore.available_permits() == self.max_size
    }

    /// Publish an event, dropping it if the queue is full.
    pub fn publish(&self, event: ChangeEvent) -> bool {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                self.queue.push(event);
                std::mem::forget(permit);
                true
            }
            Err(_) => {
                warn!(
                    "Change queue full, dropping {} event for '{}'",
                    event.kind, event.key
                );
                false
            }
        }
    }

    pub fn try_pop(&self) -> Option<ChangeEvent> {
        let event = self.queue.pop()?;
        self.semaphore.add_permits(1);
        Some(event)
    }
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Downstream notification channel (chat bot, webhook, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()>;
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        info!("Notification [{}] {}: {}", event.kind, event.key, event.detail);
        Ok(())
    }
}

/// Drains the change queue on its own schedule, independent of the sync
/// cycle. A failed notification is logged and dropped; it never blocks or
/// retries the sync path.
pub struct Dispatcher {
    queue: Arc<ChangeQueue>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
}

impl Dispatcher {
    pub fn new(queue: Arc<ChangeQueue>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            queue,
            notifier,
            interval: Duration::from_secs(5),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self) {
        info!("Starting notification dispatcher");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.drain_once().await;
        }
    }

    async fn drain_once(&self) {
        let mut dispatched = 0;
        while dispatched < DRAIN_LIMIT {
            let Some(event) = self.queue.try_pop() else {
                break;
            };
            dispatched += 1;
            if let Err(e) = self.notifier.notify(&event).await {
                warn!(
                    "Notification [{}] for '{}' failed: {}",
                    event.kind, event.key, e
                );
            }
        }
        if dispatched > 0 {
            debug!("Dispatched {} change events", dispatched);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _event: &ChangeEvent) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("channel down");
            }
            Ok(())
        }
    }

    fn event(key: &str) -> ChangeEvent {
        ChangeEvent::new(ChangeKind::PositionUpdated, key, "test")
    }

    #[test]
    fn test_queue_drops_on_overflow() {
        let queue = ChangeQueue::with_capacity(2);
        assert!(queue.publish(event("a")));
        assert!(queue.publish(event("b")));
        assert!(!queue.publish(event("c")));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_pop().unwrap().key, "a");
        assert!(queue.publish(event("d")));
    }

    #[tokio::test]
    async fn test_dispatcher_drains_and_tolerates_failures() {
        let queue = Arc::new(ChangeQueue::with_capacity(8));
        let notifier = Arc::new(CountingNotifier {
            sent: AtomicUsize::new(0),
            fail: true,
        });
        queue.publish(event("a"));
        queue.publish(event("b"));

        let dispatcher = Dispatcher::new(Arc::clone(&queue), notifier.clone());
        dispatcher.drain_once().await;

        // Both events were attempted despite the channel failing
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
    }
}
