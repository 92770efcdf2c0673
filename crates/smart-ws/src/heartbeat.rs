//! Heartbeat monitor: probe scheduling, timeout tracking and latency.
//!
//! The monitor only keeps time. Sending the probe and tearing down the
//! session on timeout are done by the connection manager, which owns the
//! transport.

use std::{future, pin::Pin, time::Duration};

use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep_until};

use crate::config::HeartbeatConfig;

/// One outstanding probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatSample {
    /// When the probe was written.
    pub sent_at: Instant,
    /// Round-trip time, present once the response has been matched.
    pub rtt: Option<Duration>,
}

pub(crate) struct HeartbeatMonitor {
    enabled: bool,
    interval: Duration,
    timeout: Duration,
    ticker: Option<Interval>,
    in_flight: Option<HeartbeatSample>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(config: &HeartbeatConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: config.interval,
            timeout: config.timeout,
            ticker: None,
            in_flight: None,
            deadline: None,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Start ticking; the first probe is due one interval from now.
    pub(crate) fn start(&mut self) {
        if !self.enabled {
            return;
        }
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.in_flight = None;
        self.deadline = None;
    }

    /// Stop ticking and discard any outstanding sample.
    pub(crate) fn stop(&mut self) {
        self.ticker = None;
        self.in_flight = None;
        self.deadline = None;
    }

    /// Record a new probe. Returns `None` while another is still outstanding
    /// or when the monitor is stopped.
    pub(crate) fn begin_probe(&mut self, now: Instant) -> Option<HeartbeatSample> {
        if self.ticker.is_none() || self.in_flight.is_some() {
            return None;
        }
        let sample = HeartbeatSample {
            sent_at: now,
            rtt: None,
        };
        self.in_flight = Some(sample);
        self.deadline = Some(Box::pin(sleep_until(now + self.timeout)));
        Some(sample)
    }

    /// Match a response against the outstanding probe. A response with no
    /// outstanding probe is ignored.
    pub(crate) fn complete(&mut self, now: Instant) -> Option<HeartbeatSample> {
        let mut sample = self.in_flight.take()?;
        self.deadline = None;
        sample.rtt = Some(now.saturating_duration_since(sample.sent_at));
        Some(sample)
    }

    /// Resolves with the next thing the manager has to act on. Never
    /// resolves while the monitor is stopped.
    ///
    /// Cancel safe: the ticker and the deadline survive a dropped future.
    pub(crate) async fn due(&mut self) -> HeartbeatDue {
        let Self {
            ticker,
            in_flight,
            deadline,
            ..
        } = self;

        tokio::select! {
            biased;
            sample = expiry(deadline, in_flight) => HeartbeatDue::Expired(sample),
            () = next_tick(ticker) => HeartbeatDue::Probe,
        }
    }
}

/// What [`HeartbeatMonitor::due`] resolved with.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeartbeatDue {
    /// The interval elapsed; a probe should go out.
    Probe,
    /// The outstanding probe went unanswered. It has been discarded.
    Expired(HeartbeatSample),
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

async fn expiry(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    in_flight: &mut Option<HeartbeatSample>,
) -> HeartbeatSample {
    match (deadline.as_mut(), *in_flight) {
        (Some(timer), Some(sample)) => {
            timer.as_mut().await;
            *deadline = None;
            *in_flight = None;
            sample
        }
        _ => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(interval_ms: u64, timeout_ms: u64) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            &HeartbeatConfig::default()
                .interval(Duration::from_millis(interval_ms))
                .timeout(Duration::from_millis(timeout_ms)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn probe_requires_running_monitor() {
        let mut hb = monitor(1000, 500);
        assert!(hb.begin_probe(Instant::now()).is_none());

        hb.start();
        assert!(hb.is_running());
        assert!(hb.begin_probe(Instant::now()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_probe_in_flight() {
        let mut hb = monitor(1000, 500);
        hb.start();
        let now = Instant::now();
        assert!(hb.begin_probe(now).is_some());
        assert!(hb.begin_probe(now + Duration::from_millis(10)).is_none());

        hb.complete(now + Duration::from_millis(20));
        assert!(hb.begin_probe(now + Duration::from_millis(30)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn response_without_probe_is_ignored() {
        let mut hb = monitor(1000, 500);
        hb.start();
        assert!(hb.complete(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rtt_is_response_minus_sent() {
        let mut hb = monitor(1000, 500);
        hb.start();
        let sent = Instant::now();
        hb.begin_probe(sent);
        let sample = hb
            .complete(sent + Duration::from_millis(125))
            .expect("matched sample");
        assert_eq!(sample.sent_at, sent);
        assert_eq!(sample.rtt, Some(Duration::from_millis(125)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let mut hb = monitor(1000, 500);
        let started = Instant::now();
        hb.start();
        assert_eq!(hb.due().await, HeartbeatDue::Probe);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(hb.due().await, HeartbeatDue::Probe);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_probe_times_out() {
        let mut hb = monitor(1000, 500);
        hb.start();
        let sent = Instant::now();
        hb.begin_probe(sent);

        let HeartbeatDue::Expired(sample) = hb.due().await else {
            panic!("expected the probe to expire before the next tick");
        };
        assert_eq!(sample.sent_at, sent);
        assert_eq!(sent.elapsed(), Duration::from_millis(500));
        assert!(hb.complete(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_monitor_never_ticks() {
        let mut hb = monitor(10, 5);
        hb.start();
        hb.begin_probe(Instant::now());
        hb.stop();
        assert!(!hb.is_running());

        let due = tokio::time::timeout(Duration::from_secs(1), hb.due()).await;
        assert!(due.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_monitor_does_not_start() {
        let mut hb = HeartbeatMonitor::new(&HeartbeatConfig::disabled());
        hb.start();
        assert!(!hb.is_running());
    }
}
