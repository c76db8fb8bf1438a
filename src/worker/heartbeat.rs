use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Random delay in `0..=max`, used to spread the first heartbeat of many
/// workers started together.
pub fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=max_ms))
}

/// Heartbeat sender that periodically sends heartbeat signals
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            // tokio intervals panic on a zero period
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the heartbeat sender, sending to the provided channel.
    ///
    /// The first tick fires after a random delay of up to half the interval.
    pub async fn run(&self, tx: mpsc::Sender<()>) {
        let start = Instant::now() + random_jitter(self.interval / 2);
        let mut interval = interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if tx.send(()).await.is_err() {
                // Receiver dropped, stop sending
                break;
            }
        }
    }
}
