//! Timer-driven status polling used while the push channel is down.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::connection::ConnectionState;

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Periodically invokes a fetch function while the push channel is not connected.
///
/// The connection guard is evaluated at start and again on every tick: a tick
/// that finds the channel live stops the poller instead of fetching. Each fetch
/// runs as its own task, so stopping the poller never cancels a request that
/// was already dispatched.
#[derive(Debug, Default)]
pub struct FallbackPoller {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FallbackPoller {
    /// Create a stopped poller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin invoking `fetch` every `interval`, first one interval from now.
    ///
    /// Returns `false` without starting if the poller is already running or if
    /// `connection` currently reports a live push channel.
    pub fn start<F, Fut>(
        &mut self,
        interval: Duration,
        connection: watch::Receiver<ConnectionState>,
        fetch: F,
    ) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            return false;
        }
        if connection.borrow().is_connected() {
            debug!("push channel connected; poller not started");
            return false;
        }

        let interval = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let live = connection.borrow().is_connected();
                if live {
                    debug!("push channel connected; poller stopping itself");
                    break;
                }
                debug!("poll tick");
                tokio::spawn(fetch());
            }
        });

        debug!(interval_ms = interval.as_millis() as u64, "poller started");
        self.task = Some(task);
        true
    }

    /// Stop polling. Returns `true` if the poller was running. Idempotent.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                let was_running = !task.is_finished();
                task.abort();
                if was_running {
                    debug!("poller stopped");
                }
                was_running
            }
            None => false,
        }
    }

    /// Returns `true` while ticks are still scheduled.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_fetch(count: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send {
        let count = Arc::clone(count);
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_the_configured_interval() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Error);
        let count = Arc::new(AtomicUsize::new(0));
        let mut poller = FallbackPoller::new();

        assert!(poller.start(DEFAULT_POLL_INTERVAL, state_rx, counting_fetch(&count)));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(poller.stop());
        assert!(!poller.stop());
        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_to_start_while_connected() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let count = Arc::new(AtomicUsize::new(0));
        let mut poller = FallbackPoller::new();

        assert!(!poller.start(DEFAULT_POLL_INTERVAL, state_rx, counting_fetch(&count)));
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_no_op() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let count = Arc::new(AtomicUsize::new(0));
        let mut poller = FallbackPoller::new();

        assert!(poller.start(DEFAULT_POLL_INTERVAL, state_rx.clone(), counting_fetch(&count)));
        assert!(!poller.start(DEFAULT_POLL_INTERVAL, state_rx, counting_fetch(&count)));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_itself_when_connection_goes_live_mid_interval() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Error);
        let count = Arc::new(AtomicUsize::new(0));
        let mut poller = FallbackPoller::new();
        poller.start(DEFAULT_POLL_INTERVAL, state_rx, counting_fetch(&count));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        state_tx.send_replace(ConnectionState::Connected);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_never_started_is_safe() {
        let mut poller = FallbackPoller::new();
        assert!(!poller.stop());
        assert!(!poller.is_running());
    }
}
