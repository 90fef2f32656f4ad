//! Periodic status and data polling
//!
//! Two independently clocked loops share one cancellation token. Each tick
//! hands its work to a spawned worker so a hung HTTP call can stall neither
//! the timer nor the caller. A tick that fires while the previous worker of
//! the same kind is still out is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest accepted tick period
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Work executed on every tick of one cadence
#[async_trait]
pub trait PollTask: Send + Sync {
    async fn tick(&self);
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Running {
    async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Status heartbeat plus data refresh, started and stopped together
pub struct PollingScheduler {
    status_interval: Duration,
    data_interval: Duration,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("status_interval", &self.status_interval)
            .field("data_interval", &self.data_interval)
            .finish_non_exhaustive()
    }
}

impl PollingScheduler {
    /// Periods below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(status_interval: Duration, data_interval: Duration) -> Self {
        Self {
            status_interval: clamp_interval("status", status_interval),
            data_interval: clamp_interval("data", data_interval),
            running: Mutex::new(None),
        }
    }

    pub fn status_interval(&self) -> Duration {
        self.status_interval
    }

    pub fn data_interval(&self) -> Duration {
        self.data_interval
    }

    /// Start both loops, replacing any loops already running
    pub async fn start(&self, status: Arc<dyn PollTask>, data: Arc<dyn PollTask>) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            debug!("Restarting polling");
            previous.shutdown().await;
        }

        let cancel = CancellationToken::new();
        let handles = vec![
            tokio::spawn(tick_loop(
                "status",
                status,
                self.status_interval,
                cancel.clone(),
            )),
            tokio::spawn(tick_loop("data", data, self.data_interval, cancel.clone())),
        ];
        debug!(
            "Polling started (status every {:?}, data every {:?})",
            self.status_interval, self.data_interval
        );
        *running = Some(Running { cancel, handles });
    }

    /// Suppress future ticks. Workers already in flight run to completion.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.shutdown().await;
            debug!("Polling stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

fn clamp_interval(kind: &str, period: Duration) -> Duration {
    if period < MIN_POLL_INTERVAL {
        warn!(
            "{} poll interval {:?} too short, using {:?}",
            kind, period, MIN_POLL_INTERVAL
        );
        MIN_POLL_INTERVAL
    } else {
        period
    }
}

/// Clears the in-flight flag when the worker finishes, even by panic
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn tick_loop(
    kind: &'static str,
    task: Arc<dyn PollTask>,
    period: Duration,
    cancel: CancellationToken,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => {
                debug!("{} polling loop cancelled", kind);
                break;
            }
        }

        if in_flight.swap(true, Ordering::SeqCst) {
            debug!("Previous {} tick still running, skipping", kind);
            continue;
        }

        let task = Arc::clone(&task);
        let guard = InFlight(Arc::clone(&in_flight));
        tokio::spawn(async move {
            let _guard = guard;
            task.tick().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTask {
        started: AtomicUsize,
        finished: AtomicUsize,
        work: Duration,
    }

    impl CountingTask {
        fn slow(work: Duration) -> Self {
            Self {
                work,
                ..Self::default()
            }
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollTask for CountingTask {
        async fn tick(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn ticks_until_stopped() {
        let scheduler = PollingScheduler::new(ms(20), ms(20));
        let status = Arc::new(CountingTask::default());
        let data = Arc::new(CountingTask::default());

        scheduler.start(status.clone(), data.clone()).await;
        assert!(scheduler.is_running().await);
        tokio::time::sleep(ms(200)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        assert!(status.started() >= 3, "status ticks: {}", status.started());
        assert!(data.started() >= 3, "data ticks: {}", data.started());

        tokio::time::sleep(ms(20)).await;
        let after_stop = status.started();
        tokio::time::sleep(ms(100)).await;
        assert_eq!(status.started(), after_stop);
    }

    #[tokio::test]
    async fn zero_interval_is_raised_and_still_ticks() {
        let scheduler = PollingScheduler::new(Duration::ZERO, ms(20));
        assert_eq!(scheduler.status_interval(), MIN_POLL_INTERVAL);
        assert_eq!(scheduler.data_interval(), ms(20));
        let status = Arc::new(CountingTask::default());
        let data = Arc::new(CountingTask::default());

        scheduler.start(status.clone(), data.clone()).await;
        tokio::time::sleep(ms(150)).await;
        scheduler.stop().await;

        assert!(status.started() >= 3, "status ticks: {}", status.started());
        assert!(data.started() >= 3, "data ticks: {}", data.started());
    }

    #[tokio::test]
    async fn first_tick_waits_one_period() {
        let scheduler = PollingScheduler::new(ms(300), ms(300));
        let status = Arc::new(CountingTask::default());
        let data = Arc::new(CountingTask::default());

        scheduler.start(status.clone(), data.clone()).await;
        tokio::time::sleep(ms(50)).await;
        assert_eq!(status.started(), 0);
        assert_eq!(data.started(), 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn cadences_are_independent() {
        let scheduler = PollingScheduler::new(ms(15), ms(250));
        let status = Arc::new(CountingTask::default());
        let data = Arc::new(CountingTask::default());

        scheduler.start(status.clone(), data.clone()).await;
        tokio::time::sleep(ms(200)).await;
        scheduler.stop().await;

        assert!(status.started() >= 4, "status ticks: {}", status.started());
        assert_eq!(data.started(), 0);
    }

    #[tokio::test]
    async fn overlapping_ticks_are_skipped() {
        let scheduler = PollingScheduler::new(ms(10), ms(1000));
        let status = Arc::new(CountingTask::slow(ms(150)));
        let data = Arc::new(CountingTask::default());

        scheduler.start(status.clone(), data.clone()).await;
        tokio::time::sleep(ms(200)).await;
        scheduler.stop().await;

        // ~20 ticks fired, but only one worker may be out at a time
        assert!(status.started() <= 2, "started: {}", status.started());
    }

    #[tokio::test]
    async fn in_flight_worker_completes_after_stop() {
        let scheduler = PollingScheduler::new(ms(10), ms(1000));
        let status = Arc::new(CountingTask::slow(ms(100)));
        let data = Arc::new(CountingTask::default());

        scheduler.start(status.clone(), data.clone()).await;
        tokio::time::sleep(ms(40)).await;
        scheduler.stop().await;
        assert_eq!(status.started(), 1);
        assert_eq!(status.finished(), 0);

        tokio::time::sleep(ms(150)).await;
        assert_eq!(status.finished(), 1);
    }

    #[tokio::test]
    async fn restart_replaces_running_loops() {
        let scheduler = PollingScheduler::new(ms(20), ms(20));
        let first = Arc::new(CountingTask::default());
        let second = Arc::new(CountingTask::default());

        scheduler.start(first.clone(), first.clone()).await;
        tokio::time::sleep(ms(60)).await;
        scheduler.start(second.clone(), second.clone()).await;
        tokio::time::sleep(ms(20)).await;
        let first_count = first.started();
        tokio::time::sleep(ms(100)).await;
        scheduler.stop().await;

        assert_eq!(first.started(), first_count);
        assert!(second.started() > 0);
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let scheduler = PollingScheduler::new(ms(20), ms(20));
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }
}
