//! Serialized request queue with exponential backoff and jitter.
//!
//! External services are rate-limited, so every call to one goes through a
//! [`RequestQueue`]: a single worker executes tasks strictly in arrival
//! order, retries transient failures with exponential backoff, and spaces
//! consecutive tasks with a randomized jitter delay so request timing does
//! not look mechanical.
//!
//! Jitter uses `std::time::SystemTime` UNIX nanos as a seed to avoid
//! requiring the `rand` crate as a dependency.

use futures::future::BoxFuture;
use hearth_types::{HearthError, HearthResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Default timeout applied to network-bound work (see [`with_timeout`]).
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for queue pacing and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base delay before the first retry, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on any backoff delay, in milliseconds.
    pub backoff_max_ms: u64,
    /// Minimum jitter inserted between consecutive tasks, in milliseconds.
    pub jitter_min_ms: u64,
    /// Maximum jitter inserted between consecutive tasks, in milliseconds.
    pub jitter_max_ms: u64,
    /// Default attempt budget per task (including the first try).
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            jitter_min_ms: 500,
            jitter_max_ms: 1_500,
            max_attempts: 3,
        }
    }
}

/// A re-invocable unit of work. The queue calls it once per attempt.
pub type Task<T> = Box<dyn Fn() -> BoxFuture<'static, HearthResult<T>> + Send + Sync>;

struct QueuedRequest<T> {
    task: Task<T>,
    reply: oneshot::Sender<HearthResult<T>>,
    max_attempts: u32,
    attempts: u32,
}

/// A FIFO queue that executes async tasks one at a time.
///
/// A failed task goes back to the head of the queue, so order is preserved
/// across retries. Each enqueued task carries its own attempt budget; the
/// queue tracks consecutive failures globally to scale the backoff.
pub struct RequestQueue<T> {
    tx: mpsc::UnboundedSender<QueuedRequest<T>>,
    shutdown_tx: watch::Sender<bool>,
    default_budget: u32,
}

impl<T: Send + 'static> RequestQueue<T> {
    /// Create a queue and spawn its worker task.
    pub fn new(config: QueueConfig) -> Self {
        let default_budget = config.max_attempts.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(worker(rx, shutdown_rx, config));
        Self {
            tx,
            shutdown_tx,
            default_budget,
        }
    }

    /// Enqueue a task with the queue's default attempt budget and wait for
    /// its final outcome.
    pub async fn enqueue(&self, task: Task<T>) -> HearthResult<T> {
        self.enqueue_with_budget(task, self.default_budget).await
    }

    /// Enqueue a task with an explicit attempt budget and wait for its final
    /// outcome.
    ///
    /// The returned result is delivered exactly once: either the first
    /// success, or the error that exhausted the budget. If the queue has
    /// shut down, returns [`HearthError::ShuttingDown`].
    pub async fn enqueue_with_budget(&self, task: Task<T>, budget: u32) -> HearthResult<T> {
        let (reply, outcome) = oneshot::channel();
        let request = QueuedRequest {
            task,
            reply,
            max_attempts: budget.max(1),
            attempts: 0,
        };
        self.tx
            .send(request)
            .map_err(|_| HearthError::ShuttingDown)?;
        outcome.await.map_err(|_| HearthError::ShuttingDown)?
    }

    /// Stop the worker. The in-flight task finishes its current attempt;
    /// everything still queued is dropped and its callers receive
    /// [`HearthError::ShuttingDown`].
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            default_budget: self.default_budget,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn worker<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<QueuedRequest<T>>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: QueueConfig,
) {
    let mut pending: VecDeque<QueuedRequest<T>> = VecDeque::new();
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            debug!(dropped = pending.len(), "request queue shutting down");
            break;
        }
        let mut request = match pending.pop_front() {
            Some(r) => r,
            None => {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(r) => r,
                        None => break,
                    },
                    _ = shutdown_rx.changed() => continue,
                }
            }
        };
        // Drain anything that arrived while we were busy, preserving order.
        while let Ok(more) = rx.try_recv() {
            pending.push_back(more);
        }

        request.attempts += 1;
        match (request.task)().await {
            Ok(value) => {
                if request.attempts > 1 {
                    debug!(
                        attempts = request.attempts,
                        "task succeeded after {} previous failures",
                        request.attempts - 1
                    );
                }
                consecutive_failures = 0;
                let _ = request.reply.send(Ok(value));
            }
            Err(err) => {
                consecutive_failures += 1;
                let exhausted = request.attempts >= request.max_attempts;
                if exhausted || !err.is_transient() {
                    warn!(
                        attempts = request.attempts,
                        max_attempts = request.max_attempts,
                        error = %err,
                        "task failed permanently"
                    );
                    let _ = request.reply.send(Err(err));
                } else {
                    let delay = compute_backoff(&config, consecutive_failures - 1);
                    debug!(
                        attempts = request.attempts,
                        delay_ms = delay,
                        error = %err,
                        "task failed, retrying after backoff"
                    );
                    pending.push_front(request);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }

        // Space out consecutive requests regardless of outcome.
        let jitter = jitter_ms(&config);
        if jitter > 0 {
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff computation
// ---------------------------------------------------------------------------

/// Compute the backoff delay for a given consecutive-failure count
/// (0-indexed).
///
/// Formula: `min(base * 2^failures, max)`.
pub fn compute_backoff(config: &QueueConfig, failures: u32) -> u64 {
    let exp = config
        .backoff_base_ms
        .saturating_mul(1u64.checked_shl(failures).unwrap_or(u64::MAX));
    exp.min(config.backoff_max_ms)
}

/// A jitter delay drawn uniformly from `[jitter_min_ms, jitter_max_ms]`.
fn jitter_ms(config: &QueueConfig) -> u64 {
    let lo = config.jitter_min_ms.min(config.jitter_max_ms);
    let hi = config.jitter_min_ms.max(config.jitter_max_ms);
    let span = hi - lo;
    if span == 0 {
        return lo;
    }
    lo + (pseudo_random_fraction() * (span as f64 + 1.0)) as u64
}

/// Return a pseudo-random fraction in `[0, 1)` using the current system time
/// nanos. This is NOT cryptographically secure, but good enough for jitter.
fn pseudo_random_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    // Knuth multiplicative hash to spread the low bits.
    let mixed = nanos.wrapping_mul(2654435761);
    (mixed as f64) / (u32::MAX as f64 + 1.0)
}

// ---------------------------------------------------------------------------
// Timeout helper
// ---------------------------------------------------------------------------

/// Race a future against a timeout, resolving to `default` on expiry.
///
/// Network calls made from a queue worker must never hang it; a call that
/// exceeds its deadline yields a caller-supplied default instead.
pub async fn with_timeout<T, F>(duration: Duration, fut: F, default: T) -> T
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(value) => value,
        Err(_) => {
            warn!(timeout_ms = duration.as_millis() as u64, "operation timed out");
            default
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast_config() -> QueueConfig {
        QueueConfig {
            backoff_base_ms: 10,
            backoff_max_ms: 1_000,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            max_attempts: 3,
        }
    }

    fn task_from<F, Fut>(f: F) -> Task<u32>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HearthResult<u32>> + Send + 'static,
    {
        Box::new(move || Box::pin(f()))
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = fast_config();
        assert_eq!(compute_backoff(&config, 0), 10);
        assert_eq!(compute_backoff(&config, 1), 20);
        assert_eq!(compute_backoff(&config, 2), 40);
        assert_eq!(compute_backoff(&config, 3), 80);
    }

    #[test]
    fn test_compute_backoff_capped() {
        let config = QueueConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 5_000,
            ..fast_config()
        };
        assert_eq!(compute_backoff(&config, 2), 4_000);
        assert_eq!(compute_backoff(&config, 3), 5_000);
        assert_eq!(compute_backoff(&config, 30), 5_000);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let config = QueueConfig {
            jitter_min_ms: 500,
            jitter_max_ms: 1_500,
            ..fast_config()
        };
        for _ in 0..100 {
            let j = jitter_ms(&config);
            assert!((500..=1_500).contains(&j), "jitter out of range: {j}");
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let queue = RequestQueue::new(fast_config());
        let result = queue
            .enqueue_with_budget(task_from(|| async { Ok(42) }), 3)
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed_with_increasing_delays() {
        let queue = RequestQueue::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let starts: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let calls_clone = calls.clone();
        let starts_clone = starts.clone();
        let task = task_from(move || {
            let calls = calls_clone.clone();
            let starts = starts_clone.clone();
            async move {
                starts.lock().unwrap().push(tokio::time::Instant::now());
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(HearthError::Transient("rate limited".into()))
                } else {
                    Ok(7)
                }
            }
        });

        let result = queue.enqueue_with_budget(task, 5).await.unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Backoff doubles between attempts: 10ms then 20ms.
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        let gap1 = starts[1] - starts[0];
        let gap2 = starts[2] - starts[1];
        assert!(gap2 > gap1, "expected increasing delays: {gap1:?} vs {gap2:?}");
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let queue = RequestQueue::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let task = task_from(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HearthError::Transient("still down".into()))
            }
        });

        let err = queue.enqueue_with_budget(task, 2).await.unwrap_err();
        assert!(matches!(err, HearthError::Transient(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The queue keeps serving after an exhausted task.
        let result = queue
            .enqueue_with_budget(task_from(|| async { Ok(1) }), 3)
            .await
            .unwrap();
        assert_eq!(result, 1);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let queue = RequestQueue::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let task = task_from(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HearthError::InvalidInput("bad request".into()))
            }
        });

        let err = queue.enqueue_with_budget(task, 5).await.unwrap_err();
        assert!(matches!(err, HearthError::InvalidInput(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let queue = Arc::new(RequestQueue::new(fast_config()));
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3u32 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let task = task_from(move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(i);
                        Ok(i)
                    }
                });
                queue.enqueue_with_budget(task, 3).await
            }));
            // Stagger the enqueues so arrival order is well-defined.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_later_work() {
        let queue = RequestQueue::new(fast_config());
        queue.shutdown();
        // Give the worker a moment to observe the signal and exit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = queue
            .enqueue(task_from(|| async { Ok(1) }))
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_with_timeout_returns_default_on_expiry() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            5u32
        };
        let value = with_timeout(Duration::from_millis(10), slow, 0u32).await;
        assert_eq!(value, 0);
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let value = with_timeout(Duration::from_secs(5), async { 5u32 }, 0u32).await;
        assert_eq!(value, 5);
    }
}
