//! Periodic background sweeps.
//!
//! The limiter and the cache only purge expired state lazily on access. A
//! sweeper removes what is never touched again so memory stays bounded by the
//! set of recently active keys. Sweepers are started explicitly by whoever owns
//! the component and stopped through their [`SweepHandle`].

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::clock::duration_ms;
use crate::error::{Result, TallyError};

/// A store that can drop its expired entries.
pub trait Sweep: Send + Sync {
    /// Remove expired entries and return how many were removed.
    fn sweep(&self) -> usize;
}

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweepHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the sweeper and wait for its task to exit.
    pub async fn stop(self) {
        // The task may already have exited, in which case there is no receiver.
        let _ = self.shutdown.send(true);

        if let Err(e) = self.task.await {
            warn!(sweeper = %self.name, error = %e, "Sweeper task ended abnormally");
        }
    }
}

/// Spawn a task that sweeps `target` every `period`.
///
/// The first sweep happens one full period after spawning. Must be called
/// from within a Tokio runtime.
pub fn spawn_sweeper(
    name: impl Into<String>,
    period: Duration,
    target: Arc<dyn Sweep>,
) -> Result<SweepHandle> {
    let name = name.into();
    if period.is_zero() {
        return Err(TallyError::Config(format!(
            "sweep interval for {} must be greater than zero",
            name
        )));
    }

    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task_name = name.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(sweeper = %task_name, period_ms = duration_ms(period), "Sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = target.sweep();
                    if removed > 0 {
                        debug!(sweeper = %task_name, removed = removed, "Sweep completed");
                    } else {
                        trace!(sweeper = %task_name, "Sweep found nothing to remove");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(sweeper = %task_name, "Sweeper stopped");
    });

    Ok(SweepHandle {
        name,
        shutdown,
        task,
    })
}

/// A group of sweepers stopped together.
#[derive(Debug, Default)]
pub struct SweepSet {
    handles: Vec<SweepHandle>,
}

impl SweepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: SweepHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every sweeper concurrently.
    pub async fn stop_all(self) {
        join_all(self.handles.into_iter().map(SweepHandle::stop)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSweep {
        calls: AtomicUsize,
    }

    impl Sweep for CountingSweep {
        fn sweep(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let target = Arc::new(CountingSweep::default());
        let result = spawn_sweeper("test", Duration::ZERO, target);
        assert!(matches!(result, Err(TallyError::Config(_))));
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_stopped() {
        let target = Arc::new(CountingSweep::default());
        let handle = spawn_sweeper("test", Duration::from_millis(10), target.clone()).unwrap();
        assert_eq!(handle.name(), "test");

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        let calls = target.calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "expected repeated sweeps, got {}", calls);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_sweep_set_stops_all() {
        let first = Arc::new(CountingSweep::default());
        let second = Arc::new(CountingSweep::default());

        let mut set = SweepSet::new();
        set.push(spawn_sweeper("first", Duration::from_millis(10), first.clone()).unwrap());
        set.push(spawn_sweeper("second", Duration::from_millis(10), second.clone()).unwrap());
        assert_eq!(set.len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        set.stop_all().await;

        let (a, b) = (first.calls.load(Ordering::SeqCst), second.calls.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(first.calls.load(Ordering::SeqCst), a);
        assert_eq!(second.calls.load(Ordering::SeqCst), b);
    }

    #[tokio::test]
    async fn test_sweeper_drives_cache_cleanup() {
        use crate::cache::TtlCache;

        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)).unwrap());
        cache.set("short", 1u32, Duration::from_millis(5));
        cache.set("long", 2u32, Duration::from_secs(60));

        let handle = spawn_sweeper("cache", Duration::from_millis(20), cache.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        assert_eq!(cache.keys(), vec!["long".to_string()]);
        assert_eq!(cache.stats().expirations, 1);
    }
}
