//! Message-driven debouncer.
//!
//! A task owns the timer and consumes `Trigger`/`Cancel` messages, so there
//! is no lock held around timer state. Every trigger resets the deadline; a
//! burst of N triggers ending at time t produces exactly one fire at
//! t + interval. Handles are cheap clones and safe to use concurrently.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
enum Msg {
    Trigger,
    Cancel,
}

/// Handle to a debouncer task.
#[derive(Debug, Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<Msg>,
}

impl Debouncer {
    /// Spawn a debouncer that sends `tag` on `fired` after `interval` of
    /// trigger silence. The task exits when every handle is dropped.
    #[must_use]
    pub fn spawn<T: Clone + Send + 'static>(
        interval: Duration,
        fired: mpsc::UnboundedSender<T>,
        tag: T,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                let sleep_target = deadline.unwrap_or_else(Instant::now);
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(Msg::Trigger) => deadline = Some(Instant::now() + interval),
                        Some(Msg::Cancel) => deadline = None,
                        None => break,
                    },
                    () = sleep_until(sleep_target), if deadline.is_some() => {
                        deadline = None;
                        if fired.send(tag.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    /// Reset the timer; may be called concurrently from any task.
    pub fn trigger(&self) {
        let _ = self.tx.send(Msg::Trigger);
    }

    /// Drop any pending fire; idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(Msg::Cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause, timeout};

    #[tokio::test]
    async fn burst_of_triggers_fires_once() {
        pause();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::spawn(Duration::from_millis(50), fired_tx, "export");

        for _ in 0..100 {
            debouncer.trigger();
        }
        // Let the task drain its mailbox before advancing the clock.
        tokio::task::yield_now().await;
        advance(Duration::from_millis(60)).await;

        assert_eq!(fired_rx.recv().await, Some("export"));
        // No second fire queued.
        advance(Duration::from_millis(200)).await;
        assert!(fired_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trigger_resets_the_deadline() {
        pause();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::spawn(Duration::from_millis(50), fired_tx, ());

        debouncer.trigger();
        tokio::task::yield_now().await;
        advance(Duration::from_millis(30)).await;
        debouncer.trigger();
        tokio::task::yield_now().await;

        // 30ms after the second trigger: nothing yet.
        advance(Duration::from_millis(30)).await;
        assert!(fired_rx.try_recv().is_err());

        advance(Duration::from_millis(30)).await;
        assert!(fired_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn cancel_drops_pending_fire() {
        pause();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::spawn(Duration::from_millis(50), fired_tx, ());

        debouncer.trigger();
        tokio::task::yield_now().await;
        debouncer.cancel();
        debouncer.cancel(); // idempotent
        tokio::task::yield_now().await;

        advance(Duration::from_millis(200)).await;
        assert!(fired_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fires_again_after_new_trigger() {
        pause();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::spawn(Duration::from_millis(50), fired_tx, ());

        debouncer.trigger();
        tokio::task::yield_now().await;
        advance(Duration::from_millis(60)).await;
        assert!(timeout(Duration::from_secs(1), fired_rx.recv())
            .await
            .unwrap()
            .is_some());

        debouncer.trigger();
        tokio::task::yield_now().await;
        advance(Duration::from_millis(60)).await;
        assert!(timeout(Duration::from_secs(1), fired_rx.recv())
            .await
            .unwrap()
            .is_some());
    }
}
