/*!
 * Timer handles on the tokio runtime
 *
 * Every timer is a spawned task. The owning [`TimerHandle`] aborts it on
 * `clear()` or drop, so a torn-down component cannot leave work behind.
 * Deadlines are taken when the timer is created, not when its task first
 * runs.
 */

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::system::lock;

/// Owner of one spawned timer task
#[derive(Debug, Default)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// A handle that owns nothing
    pub fn idle() -> Self {
        Self { task: None }
    }

    /// Adopt an already spawned task
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Abort the task if it is still pending
    pub fn clear(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Replace the owned task, aborting the previous one
    pub fn replace(&mut self, next: TimerHandle) {
        self.clear();
        *self = next;
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Run `f` once after `delay`
pub fn set_timeout<F>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let deadline = Instant::now() + delay;
    TimerHandle::from_task(tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        f();
    }))
}

/// Run `f` every `period`, first after one full period
pub fn set_interval<F>(period: Duration, mut f: F) -> TimerHandle
where
    F: FnMut() + Send + 'static,
{
    let start = Instant::now() + period;
    TimerHandle::from_task(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            f();
        }
    }))
}

/// Await `fut` after `delay`; clearing the handle cancels it at any point
pub fn spawn_after<Fut>(delay: Duration, fut: Fut) -> TimerHandle
where
    Fut: Future<Output = ()> + Send + 'static,
{
    let deadline = Instant::now() + delay;
    TimerHandle::from_task(tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        fut.await;
    }))
}

/// Await `f()` every `period`. A tick that overruns the period delays the
/// next one instead of stacking.
pub fn spawn_every<F, Fut>(period: Duration, mut f: F) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let start = Instant::now() + period;
    TimerHandle::from_task(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            f().await;
        }
    }))
}

/// Restart-a-timer debouncer: the most recent trigger wins and `f` runs once
/// the input has been quiet for `delay`
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<TimerHandle>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(TimerHandle::idle()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn trigger<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let next = set_timeout(self.delay, f);
        lock(&self.pending).replace(next);
    }

    pub fn cancel(&self) {
        lock(&self.pending).clear();
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let _timer = set_timeout(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_count_from_creation() {
        let hits = Arc::new(AtomicU32::new(0));
        let (a, b, c) = (hits.clone(), hits.clone(), hits.clone());
        let _timeout = set_timeout(Duration::from_millis(100), move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let _after = spawn_after(Duration::from_millis(100), async move {
            b.fetch_add(1, Ordering::SeqCst);
        });
        let _interval = set_interval(Duration::from_millis(100), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // No yield between creation and the clock moving
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timeout_never_fires() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let mut timer = set_timeout(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        timer.clear();

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_skips_immediate_tick() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let _timer = set_interval(Duration::from_secs(30), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        for expected in 1..=3 {
            tokio::time::advance(Duration::from_secs(30)).await;
            settle().await;
            assert_eq!(hits.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_after_cancelled_mid_flight() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let mut timer = spawn_after(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert!(timer.is_active());
        timer.clear();

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_runs_latest_once() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let last = Arc::new(AtomicU32::new(0));
        let runs = Arc::new(AtomicU32::new(0));

        for value in 1..=4 {
            let (last, runs) = (last.clone(), runs.clone());
            debouncer.trigger(move || {
                last.store(value, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(50)).await;
            settle().await;
        }

        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 4);
        assert!(!debouncer.is_pending());
    }
}
