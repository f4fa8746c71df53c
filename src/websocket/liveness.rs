//! Application-level ping/pong for one connection.

use crate::common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counters reported when the monitor stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LivenessStats {
    pub pings: u64,
    pub timeouts: u64,
}

pub struct LivenessMonitor {
    ping_interval: Duration,
    ping_timeout: Duration,
    pong: Arc<Notify>,
}

impl LivenessMonitor {
    pub fn new(ping_interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            ping_interval,
            ping_timeout,
            pong: Arc::new(Notify::new()),
        }
    }

    /// Signal the pong handler fires on every pong.
    pub fn pong_signal(&self) -> Arc<Notify> {
        self.pong.clone()
    }

    /// Pause between a received pong and the next ping, a little under the
    /// server's interval.
    pub fn cycle_sleep(&self) -> Duration {
        self.ping_interval.mul_f64(0.95)
    }

    /// Pings until `token` is cancelled.
    ///
    /// A missing pong is logged and followed by another ping straight away; the
    /// connection itself is not torn down here.
    pub async fn run<F>(self, token: CancellationToken, mut send_ping: F) -> LivenessStats
    where
        F: FnMut() -> Result<()> + Send,
    {
        let mut stats = LivenessStats::default();
        let cycle = self.cycle_sleep();
        debug!(interval = ?self.ping_interval, timeout = ?self.ping_timeout, "liveness monitor started");

        while !token.is_cancelled() {
            if let Err(e) = send_ping() {
                warn!(error = %e, "ping could not be sent");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.ping_timeout) => continue,
                }
            }
            stats.pings += 1;

            tokio::select! {
                _ = token.cancelled() => break,
                pong = tokio::time::timeout(self.ping_timeout, self.pong.notified()) => {
                    if pong.is_err() {
                        stats.timeouts += 1;
                        warn!(timeout = ?self.ping_timeout, "no pong received in time");
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(cycle) => {}
            }
        }

        debug!(pings = stats.pings, timeouts = stats.timeouts, "liveness monitor stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WiredExchangeError;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn sleeps_slightly_less_than_the_interval() {
        let monitor = LivenessMonitor::new(Duration::from_millis(18_000), Duration::from_secs(10));
        assert_eq!(monitor.cycle_sleep(), Duration::from_millis(17_100));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_pings_again() {
        let monitor = LivenessMonitor::new(Duration::from_secs(18), Duration::from_secs(1));
        let token = CancellationToken::new();
        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();
        let task = tokio::spawn(monitor.run(token.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        // Three timeouts fit in 3.5s; with pongs only one ping would go out.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        token.cancel();
        let stats = task.await.unwrap();
        assert_eq!(stats.timeouts, 3);
        assert_eq!(stats.pings, 4);
        assert_eq!(sent.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_waits_a_full_cycle() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10), Duration::from_secs(5));
        let pong = monitor.pong_signal();
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor.run(token.clone(), move || {
            pong.notify_one();
            Ok(())
        }));

        // Pings at 0s, 9.5s, 19s.
        tokio::time::sleep(Duration::from_secs(20)).await;
        token.cancel();
        let stats = task.await.unwrap();
        assert_eq!(stats, LivenessStats { pings: 3, timeouts: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_retries_after_timeout() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10), Duration::from_secs(2));
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor.run(token.clone(), || Err(WiredExchangeError::NotConnected)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        assert_eq!(task.await.unwrap(), LivenessStats::default());
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let monitor = LivenessMonitor::new(Duration::from_secs(60), Duration::from_secs(60));
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor.run(token.clone(), || Ok(())));
        token.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.pings <= 1);
    }
}
