use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::chain::ChainReader;

/// Where the orchestrator reads the chain height from.
#[async_trait]
pub trait HeightSource: Send + Sync {
    async fn block_height(&self) -> anyhow::Result<u64>;
}

#[async_trait]
impl HeightSource for ChainReader {
    async fn block_height(&self) -> anyhow::Result<u64> {
        Ok(self.block_number().await?)
    }
}

/// A named unit of refresh work. Tasks are idempotent and safe to call
/// repeatedly; their failures are caught at the orchestrator boundary.
pub struct SyncTask {
    name: &'static str,
    run: Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>,
}

impl SyncTask {
    pub fn new<F, Fut>(name: &'static str, f: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Arc::new(Self {
            name,
            run: Box::new(move || Box::pin(f())),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn invoke(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.run)()
    }
}

#[derive(Debug)]
struct CycleState {
    fetched_height: u64,
    in_progress: bool,
    polls_without_progress: u32,
    /// Generation counter: bumped on every cycle start, so a force-cleared
    /// cycle's late commit is recognized and discarded.
    cycle: u64,
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(6);
const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(50);
const DEFAULT_STUCK_THRESHOLD: u32 = 5;

/// Drives the refresh plan off the chain-height watermark.
///
/// A poll starts a cycle only when the height moved past the last
/// committed one and no cycle is running. The cycle executes the plan's
/// batches in order, tasks within a batch concurrently, every task
/// failure isolated; it then commits the detected height. A cycle that
/// stays in progress across too many polls is abandoned.
pub struct Orchestrator {
    heights: Arc<dyn HeightSource>,
    plan: Arc<Vec<Vec<Arc<SyncTask>>>>,
    state: Arc<Mutex<CycleState>>,
    poll_interval: Duration,
    batch_pause: Duration,
    stuck_threshold: u32,
}

impl Orchestrator {
    pub fn new(heights: Arc<dyn HeightSource>, plan: Vec<Vec<Arc<SyncTask>>>) -> Self {
        Self {
            heights,
            plan: Arc::new(plan),
            state: Arc::new(Mutex::new(CycleState {
                fetched_height: 0,
                in_progress: false,
                polls_without_progress: 0,
                cycle: 0,
            })),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_pause: DEFAULT_BATCH_PAUSE,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_pause(mut self, batch_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self
    }

    pub fn with_stuck_threshold(mut self, stuck_threshold: u32) -> Self {
        self.stuck_threshold = stuck_threshold;
        self
    }

    /// Height of the last committed cycle.
    pub fn fetched_height(&self) -> u64 {
        self.state.lock().fetched_height
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().in_progress
    }

    pub async fn run(&self) {
        info!(
            "Starting sync orchestrator, polling every {:?} across {} batches",
            self.poll_interval,
            self.plan.len()
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            self.poll().await;
        }
    }

    /// One poll: detect a new height and start a cycle if none is running.
    pub async fn poll(&self) {
        let height = match self.heights.block_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!("Failed to read chain height: {}", e);
                return;
            }
        };

        let started = {
            let mut state = self.state.lock();
            state.polls_without_progress += 1;

            if height > state.fetched_height && !state.in_progress {
                state.in_progress = true;
                state.cycle += 1;
                Some(state.cycle)
            } else {
                if state.in_progress && state.polls_without_progress >= self.stuck_threshold {
                    warn!(
                        "Sync cycle {} made no progress for {} polls, force-clearing",
                        state.cycle, state.polls_without_progress
                    );
                    state.polls_without_progress = 0;
                    state.in_progress = false;
                }
                None
            }
        };

        if let Some(cycle) = started {
            info!("Chain height {}, starting sync cycle {}", height, cycle);
            let plan = Arc::clone(&self.plan);
            let state = Arc::clone(&self.state);
            let batch_pause = self.batch_pause;
            tokio::spawn(async move {
                run_plan(&plan, batch_pause).await;
                commit(&state, cycle, height);
            });
        }
    }
}

/// Execute the batch plan. Partial success is the normal case, not an
/// error state.
async fn run_plan(plan: &[Vec<Arc<SyncTask>>], batch_pause: Duration) {
    for (idx, batch) in plan.iter().enumerate() {
        if idx > 0 {
            tokio::time::sleep(batch_pause).await;
        }

        let work = batch.iter().map(|task| {
            let task = Arc::clone(task);
            async move {
                let started = Instant::now();
                match task.invoke().await {
                    Ok(()) => debug!(
                        "Task '{}' completed in {}ms",
                        task.name(),
                        started.elapsed().as_millis()
                    ),
                    Err(e) => warn!(
                        "Task '{}' failed after {}ms: {:#}",
                        task.name(),
                        started.elapsed().as_millis(),
                        e
                    ),
                }
            }
        });
        futures::future::join_all(work).await;
    }
}

fn commit(state: &Mutex<CycleState>, cycle: u64, height: u64) {
    let mut state = state.lock();
    if state.cycle != cycle || !state.in_progress {
        // The cycle was force-cleared (and possibly superseded). Its cache
        // merges stand, but the watermark must not move.
        warn!("Discarding commit of abandoned sync cycle {}", cycle);
        return;
    }
    state.fetched_height = height;
    state.in_progress = false;
    state.polls_without_progress = 0;
    info!("Sync cycle {} committed at height {}", cycle, height);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    struct FixedHeights {
        height: AtomicU64,
    }

    impl FixedHeights {
        fn at(height: u64) -> Arc<Self> {
            Arc::new(Self {
                height: AtomicU64::new(height),
            })
        }

        fn set(&self, height: u64) {
            self.height.store(height, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HeightSource for FixedHeights {
        async fn block_height(&self) -> anyhow::Result<u64> {
            Ok(self.height.load(Ordering::SeqCst))
        }
    }

    fn counting_task(counter: Arc<AtomicUsize>) -> Arc<SyncTask> {
        SyncTask::new("counting", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    /// Task that blocks until a permit is released, counting invocations.
    fn gated_task(counter: Arc<AtomicUsize>, gate: Arc<Semaphore>) -> Arc<SyncTask> {
        SyncTask::new("gated", move || {
            let counter = Arc::clone(&counter);
            let gate = Arc::clone(&gate);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let permit = gate.acquire().await?;
                permit.forget();
                Ok(())
            }
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_overlapping_polls_do_not_start_second_cycle() {
        let heights = FixedHeights::at(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let plan = vec![vec![gated_task(Arc::clone(&calls), Arc::clone(&gate))]];

        let orchestrator = Orchestrator::new(heights.clone(), plan).with_stuck_threshold(10);

        orchestrator.poll().await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.is_running());

        // New height while the first cycle is still in flight: no-op
        heights.set(101);
        orchestrator.poll().await;
        orchestrator.poll().await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Release the cycle; it commits the height it detected
        gate.add_permits(1);
        settle().await;
        assert_eq!(orchestrator.fetched_height(), 100);
        assert!(!orchestrator.is_running());

        // The next poll picks up the newer height with a fresh cycle
        gate.add_permits(1);
        orchestrator.poll().await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.fetched_height(), 101);
    }

    #[tokio::test]
    async fn test_unchanged_height_starts_no_cycle() {
        let heights = FixedHeights::at(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let plan = vec![vec![counting_task(Arc::clone(&calls))]];

        let orchestrator = Orchestrator::new(heights.clone(), plan);

        orchestrator.poll().await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.fetched_height(), 100);

        // Same height again: nothing to do
        orchestrator.poll().await;
        orchestrator.poll().await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stuck_cycle_is_force_cleared_and_commit_discarded() {
        let heights = FixedHeights::at(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let plan = vec![vec![gated_task(Arc::clone(&calls), Arc::clone(&gate))]];

        let orchestrator = Orchestrator::new(heights.clone(), plan).with_stuck_threshold(3);

        // Cycle 1 hangs on the gate
        orchestrator.poll().await;
        settle().await;
        assert!(orchestrator.is_running());

        // Two more polls reach the threshold and force-clear the flag
        heights.set(101);
        orchestrator.poll().await;
        orchestrator.poll().await;
        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.fetched_height(), 0);

        // Release the abandoned cycle 1; its late commit at height 100 is
        // discarded and the watermark stays untouched
        gate.add_permits(1);
        settle().await;
        assert_eq!(orchestrator.fetched_height(), 0);

        // Cycle 2 runs to completion
        gate.add_permits(1);
        orchestrator.poll().await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.fetched_height(), 101);
    }

    #[tokio::test]
    async fn test_task_failure_does_not_abort_batch_or_commit() {
        let heights = FixedHeights::at(100);
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let failing = SyncTask::new("failing", || async { anyhow::bail!("upstream exploded") });
        let plan = vec![
            vec![failing, counting_task(Arc::clone(&ok_calls))],
            vec![counting_task(Arc::clone(&ok_calls))],
        ];

        let orchestrator =
            Orchestrator::new(heights.clone(), plan).with_batch_pause(Duration::from_millis(1));

        orchestrator.poll().await;
        settle().await;

        // Sibling and follow-up batch both ran; the cycle still committed
        assert_eq!(ok_calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.fetched_height(), 100);
    }

    #[tokio::test]
    async fn test_two_cycle_union_scenario() {
        #[derive(Clone, Debug, PartialEq)]
        struct Pos {
            id: &'static str,
            minted: u64,
        }

        let heights = FixedHeights::at(100);
        let cache: Arc<SnapshotCache<&'static str, Pos>> = Arc::new(SnapshotCache::new());
        let pages: Arc<Mutex<Vec<Vec<Pos>>>> = Arc::new(Mutex::new(vec![
            // First cycle: three positions
            vec![
                Pos { id: "p1", minted: 10 },
                Pos { id: "p2", minted: 20 },
                Pos { id: "p3", minted: 30 },
            ],
            // Second cycle: pagination quirk drops p1, p2 changed, p4 new
            vec![Pos { id: "p2", minted: 25 }, Pos { id: "p4", minted: 40 }],
        ]));

        let task = {
            let cache = Arc::clone(&cache);
            let pages = Arc::clone(&pages);
            SyncTask::new("positions", move || {
                let cache = Arc::clone(&cache);
                let pages = Arc::clone(&pages);
                async move {
                    let page = {
                        let mut pages = pages.lock();
                        if pages.is_empty() {
                            return Ok(());
                        }
                        pages.remove(0)
                    };
                    let batch: HashMap<&'static str, Pos> =
                        page.into_iter().map(|p| (p.id, p)).collect();
                    cache.merge(batch);
                    Ok(())
                }
            })
        };

        let orchestrator = Orchestrator::new(heights.clone(), vec![vec![task]]);

        orchestrator.poll().await;
        settle().await;
        assert_eq!(orchestrator.fetched_height(), 100);
        assert_eq!(cache.len(), 3);

        heights.set(101);
        orchestrator.poll().await;
        settle().await;

        // Union semantics: p1 preserved, p2 overwritten, p4 added
        assert_eq!(orchestrator.fetched_height(), 101);
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get(&"p1").unwrap().minted, 10);
        assert_eq!(cache.get(&"p2").unwrap().minted, 25);
        assert_eq!(cache.get(&"p4").unwrap().minted, 40);
    }
}
