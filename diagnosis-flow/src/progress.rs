//! Cosmetic progress indicator for an analysis attempt.
//!
//! The value only ever grows and stays below 100 until the attempt succeeds.
//! It says nothing about how far the backend actually got.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub const TICK_INTERVAL: Duration = Duration::from_millis(300);
pub const TICK_STEP: u8 = 8;
pub const TICK_CEILING: u8 = 90;
pub const COMPLETE: u8 = 100;

/// Shared view on the progress of one attempt.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    value: Arc<AtomicU8>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u8 {
        self.value.load(Ordering::SeqCst)
    }

    /// Moves forward to `value` (capped below completion); never moves back.
    pub fn advance_to(&self, value: u8) {
        self.value
            .fetch_max(value.min(TICK_CEILING), Ordering::SeqCst);
    }

    fn tick(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < TICK_CEILING).then(|| current.saturating_add(TICK_STEP).min(TICK_CEILING))
            });
    }

    fn complete(&self) {
        self.value.store(COMPLETE, Ordering::SeqCst);
    }
}

/// Timer task bumping a [`ProgressHandle`] while an attempt runs.
///
/// The task is aborted when the ticker is dropped, so every way out of an
/// attempt stops it.
pub struct ProgressTicker {
    handle: ProgressHandle,
    task: JoinHandle<()>,
}

impl ProgressTicker {
    pub fn start(handle: ProgressHandle) -> Self {
        let ticking = handle.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            // first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                ticking.tick();
            }
        });
        Self { handle, task }
    }

    pub fn handle(&self) -> &ProgressHandle {
        &self.handle
    }

    /// Stops the timer and snaps the indicator to 100.
    pub fn finish(self) {
        self.task.abort();
        self.handle.complete();
        debug!("Progress ticker finished");
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_up_to_ceiling_and_stops_on_drop() {
        let handle = ProgressHandle::new();
        let ticker = ProgressTicker::start(handle.clone());

        tokio::time::sleep(TICK_INTERVAL * 3 + Duration::from_millis(10)).await;
        assert_eq!(handle.get(), TICK_STEP * 3);

        tokio::time::sleep(TICK_INTERVAL * 20).await;
        assert_eq!(handle.get(), TICK_CEILING);

        handle.advance_to(99);
        assert_eq!(handle.get(), TICK_CEILING);

        drop(ticker);
        tokio::time::sleep(TICK_INTERVAL * 5).await;
        assert_eq!(handle.get(), TICK_CEILING);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_snaps_to_complete() {
        let handle = ProgressHandle::new();
        let ticker = ProgressTicker::start(handle.clone());
        handle.advance_to(30);
        handle.advance_to(10);
        assert_eq!(ticker.handle().get(), 30);

        ticker.finish();
        assert_eq!(handle.get(), COMPLETE);
        tokio::time::sleep(TICK_INTERVAL * 5).await;
        assert_eq!(handle.get(), COMPLETE);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_ticker_leaves_value_frozen() {
        let handle = ProgressHandle::new();
        {
            let _ticker = ProgressTicker::start(handle.clone());
            tokio::time::sleep(TICK_INTERVAL + Duration::from_millis(10)).await;
        }
        let frozen = handle.get();
        assert_eq!(frozen, TICK_STEP);
        tokio::time::sleep(TICK_INTERVAL * 10).await;
        assert_eq!(handle.get(), frozen);
    }
}
