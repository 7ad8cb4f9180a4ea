//! Delay-and-retry timer.
//!
//! [`RetryScheduler`] arms at most one restart callback at a time. Scheduling
//! a new callback cancels the pending one, so overlapping retries cannot
//! occur. The timer runs as a local task; it must be used inside a
//! `tokio::task::LocalSet`.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-slot restart timer.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    pending: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `restart` once after `delay`, unless cancelled first.
    ///
    /// Any previously pending callback is cancelled.
    pub fn schedule<F>(&mut self, delay: Duration, restart: F)
    where
        F: FnOnce() + 'static,
    {
        self.cancel();
        tracing::debug!(delay_ms = delay.as_millis(), "retry scheduled");
        self.pending = Some(tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            restart();
        }));
    }

    /// Cancel the pending callback, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    /// Whether a callback is armed and has not fired yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.is_finished())
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(0));
                let mut retry = RetryScheduler::new();
                let counter = Rc::clone(&fired);
                retry.schedule(Duration::from_millis(100), move || {
                    counter.set(counter.get() + 1);
                });
                assert!(retry.is_pending());

                tokio::time::sleep(Duration::from_millis(99)).await;
                settle().await;
                assert_eq!(fired.get(), 0);

                tokio::time::sleep(Duration::from_millis(1)).await;
                settle().await;
                assert_eq!(fired.get(), 1);
                assert!(!retry.is_pending());

                tokio::time::sleep(Duration::from_secs(10)).await;
                settle().await;
                assert_eq!(fired.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_callback() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let mut retry = RetryScheduler::new();
                let flag = Rc::clone(&fired);
                retry.schedule(Duration::from_millis(50), move || flag.set(true));
                retry.cancel();
                retry.cancel();

                tokio::time::sleep(Duration::from_millis(200)).await;
                settle().await;
                assert!(!fired.get());
                assert!(!retry.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_callback() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(Vec::new()));
                let mut retry = RetryScheduler::new();

                let first = Rc::clone(&fired);
                retry.schedule(Duration::from_millis(10), move || {
                    let mut seen = first.take();
                    seen.push("first");
                    first.set(seen);
                });
                let second = Rc::clone(&fired);
                retry.schedule(Duration::from_millis(30), move || {
                    let mut seen = second.take();
                    seen.push("second");
                    second.set(seen);
                });

                tokio::time::sleep(Duration::from_millis(100)).await;
                settle().await;
                assert_eq!(fired.take(), vec!["second"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_on_next_tick() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let mut retry = RetryScheduler::new();
                let flag = Rc::clone(&fired);
                retry.schedule(Duration::ZERO, move || flag.set(true));
                assert!(!fired.get());
                tokio::time::sleep(Duration::from_millis(1)).await;
                settle().await;
                assert!(fired.get());
            })
            .await;
    }
}
