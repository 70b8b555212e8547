//! Concurrent, timeout-bounded admission queue between the network and
//! the simulation loop.
//!
//! Admission enforces per-sender monotonic ordering: an input whose index
//! is at or below the sender's last admitted index is dropped, never
//! reordered. Admitted inputs go through a small bounded FIFO channel;
//! when it is full the enqueue blocks, pushing back on the network side
//! rather than dropping fresh inputs.
//!
//! Every admitted input gets one watcher with a fixed one-tick deadline.
//! Because the channel is strict FIFO, an element nearer the head is at
//! least as old as every element behind it; a watcher that fires thereby
//! proves the current head is stale, so eviction always removes the head
//! and never needs to track which watcher owns which slot. A successful
//! dequeue hands back one cancellation ticket that stands down whichever
//! pending watcher claims it, which is correct for the same reason.

use log::debug;
use shared::Input;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::time::{interval, sleep};

const INPUT_CHAN_CAPACITY: usize = 10;
/// One simulation tick. An input older than this is too stale to apply.
const INPUT_TIMEOUT: Duration = Duration::from_micros(1_000_000 / 60);

/// High-water marks kept with atomic counters and logged by a periodic
/// sampler task. Observability only.
#[derive(Debug, Default)]
struct QueueStats {
    depth: AtomicUsize,
    max_depth: AtomicUsize,
    watchers: AtomicUsize,
    max_watchers: AtomicUsize,
}

impl QueueStats {
    fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_depth.fetch_max(depth, Ordering::Relaxed);
    }

    fn record_removal(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    fn watcher_spawned(&self) {
        let watchers = self.watchers.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_watchers.fetch_max(watchers, Ordering::Relaxed);
    }

    fn watcher_resolved(&self) {
        self.watchers.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct InputQueue {
    /// `None` once closed. Dropping the stored sender closes the channel,
    /// so a consumer parked in `dequeue` wakes up without `close` having
    /// to touch the receiver lock.
    input_tx: Mutex<Option<mpsc::Sender<Input>>>,
    /// Shared with timeout watchers: a firing watcher locks the receiver
    /// just long enough to evict the head.
    input_rx: Arc<Mutex<mpsc::Receiver<Input>>>,
    /// Cancellation tickets. `dequeue` adds one permit per consumed
    /// input; each watcher races an acquire against its deadline.
    cancel: Arc<Semaphore>,
    last_indices: Mutex<HashMap<SocketAddr, Arc<AtomicU32>>>,
    stats: Arc<QueueStats>,
    timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputQueue {
    pub fn new() -> Self {
        Self::with_timeout(INPUT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHAN_CAPACITY);
        let stats = Arc::new(QueueStats::default());
        let (shutdown, _) = watch::channel(false);

        tokio::spawn(report_load(Arc::clone(&stats), shutdown.subscribe()));

        Self {
            input_tx: Mutex::new(Some(input_tx)),
            input_rx: Arc::new(Mutex::new(input_rx)),
            cancel: Arc::new(Semaphore::new(0)),
            last_indices: Mutex::new(HashMap::new()),
            stats,
            timeout,
            shutdown,
        }
    }

    /// Admits `inputs` from `sender` in order. Stale or duplicate indices
    /// are dropped silently; each admitted input blocks while the channel
    /// is full and gets exactly one timeout watcher.
    pub async fn process_inputs(&self, sender: SocketAddr, inputs: &[Input]) {
        let Some(tx) = self.input_tx.lock().await.clone() else {
            return; // queue closed, nothing more to admit
        };

        let counter = {
            let mut indices = self.last_indices.lock().await;
            Arc::clone(
                indices
                    .entry(sender)
                    .or_insert_with(|| Arc::new(AtomicU32::new(0))),
            )
        };

        for &input in inputs {
            if input.index <= counter.load(Ordering::Acquire) {
                continue;
            }

            if tx.send(input).await.is_err() {
                return;
            }
            counter.store(input.index, Ordering::Release);
            self.stats.record_enqueue();
            self.spawn_watcher();
        }
    }

    /// Blocks until an input is available or the queue is closed and
    /// drained. Each consumed input releases one cancellation ticket.
    pub async fn dequeue(&self) -> Option<Input> {
        let input = self.input_rx.lock().await.recv().await?;
        self.stats.record_removal();
        if !self.cancel.is_closed() {
            self.cancel.add_permits(1);
        }
        Some(input)
    }

    /// Closes the input channel (draining is still possible) and resolves
    /// all pending watchers. Safe only once no further `process_inputs`
    /// calls will occur.
    pub async fn close(&self) {
        self.input_tx.lock().await.take();
        self.cancel.close();
        let _ = self.shutdown.send(true);
    }

    fn spawn_watcher(&self) {
        let input_rx = Arc::clone(&self.input_rx);
        let cancel = Arc::clone(&self.cancel);
        let stats = Arc::clone(&self.stats);
        let deadline = self.timeout;

        stats.watcher_spawned();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(deadline) => {
                    // Evict the current head; an empty queue means the
                    // head this watcher proved stale was already gone.
                    if input_rx.lock().await.try_recv().is_ok() {
                        stats.record_removal();
                        debug!("evicted stale input at queue head");
                    }
                }
                permit = cancel.acquire() => {
                    // A ticket from dequeue, or queue shutdown; either
                    // way the watcher stands down.
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
            stats.watcher_resolved();
        });
    }

    #[cfg(test)]
    fn pending_watchers(&self) -> usize {
        self.stats.watchers.load(Ordering::Relaxed)
    }
}

async fn report_load(stats: Arc<QueueStats>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!(
                    "input queue load: max_depth={} max_watchers={}",
                    stats.max_depth.load(Ordering::Relaxed),
                    stats.max_watchers.load(Ordering::Relaxed),
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}
