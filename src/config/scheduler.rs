use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};

/// Why a refresh loop woke up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Wakeup {
    Tick,
    /// Somebody asked for a refresh. Carries the first key that was asked
    /// for. Anything else queued up behind it was dropped.
    Signal(String),
}

/// Paces a refresh loop: wakes up once per period, or earlier if a
/// [Trigger] fires.
///
/// Signals that arrive while a refresh is in progress are coalesced into a
/// single wakeup. A dropped signal is never retried, the next tick picks up
/// whatever it wanted.
pub struct RefreshScheduler {
    interval: Interval,
    signals: mpsc::Receiver<String>,
}

/// A handle for asking a [RefreshScheduler] to wake up early.
#[derive(Clone, Debug)]
pub struct Trigger {
    tx: mpsc::Sender<String>,
}

impl Trigger {
    /// Queue a refresh for `key`. Returns `false` without waiting if the
    /// queue is full or the scheduler is gone.
    pub fn try_send(&self, key: impl Into<String>) -> bool {
        self.tx.try_send(key.into()).is_ok()
    }
}

impl RefreshScheduler {
    pub fn new(period: Duration, capacity: usize) -> (Self, Trigger) {
        // the first refresh happens when a source is added, so skip the
        // immediate tick an interval normally starts with.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (tx, signals) = mpsc::channel(capacity.max(1));
        (Self { interval, signals }, Trigger { tx })
    }

    pub async fn wait(&mut self) -> Wakeup {
        let wakeup = tokio::select! {
            biased;
            Some(key) = self.signals.recv() => Wakeup::Signal(key),
            _ = self.interval.tick() => Wakeup::Tick,
        };

        while self.signals.try_recv().is_ok() {}
        wakeup
    }
}
