//! Transfer progress monitoring for one in-flight upload.
//!
//! The transport side records byte counts through a [`ProgressSender`];
//! samples flow over a channel to whoever owns the matching receiver
//! (the upload state machine, which copies them into the `Upload`
//! model record for UI polling). Recording never blocks: the channel
//! is unbounded and a closed receiver is silently ignored.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Total bytes transferred so far.
    pub transferred: u64,
    /// Instantaneous speed in bytes per second.
    pub speed: f64,
    /// Estimated remaining time, when the speed is meaningful.
    pub time_left: Option<Duration>,
}

/// Producer half of a transfer monitor.
#[derive(Debug)]
pub struct ProgressSender {
    total_size: u64,
    state: Mutex<SpeedState>,
    tx: mpsc::UnboundedSender<ProgressSample>,
}

#[derive(Debug)]
struct SpeedState {
    last_instant: Instant,
    last_transferred: u64,
}

/// Create the monitor pair for a transfer of `total_size` bytes.
pub fn transfer_monitor(
    total_size: u64,
) -> (ProgressSender, mpsc::UnboundedReceiver<ProgressSample>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = ProgressSender {
        total_size,
        state: Mutex::new(SpeedState {
            last_instant: Instant::now(),
            last_transferred: 0,
        }),
        tx,
    };
    (sender, rx)
}

impl ProgressSender {
    /// Record the cumulative byte count; in-memory bookkeeping only.
    pub fn record(&self, transferred: u64) {
        let sample = {
            let mut state = self.state.lock().expect("monitor state poisoned");
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_instant).as_secs_f64();
            let delta = transferred.saturating_sub(state.last_transferred) as f64;

            let speed = if elapsed > 0.0 { delta / elapsed } else { 0.0 };
            let remaining = self.total_size.saturating_sub(transferred);
            let time_left = if speed > 0.0 {
                Some(Duration::from_secs_f64(remaining as f64 / speed))
            } else {
                None
            };

            state.last_instant = now;
            state.last_transferred = transferred;

            ProgressSample {
                transferred,
                speed,
                time_left,
            }
        };

        // Receiver may already be gone after cancellation.
        let _ = self.tx.send(sample);
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_samples_in_order() {
        let (sender, mut rx) = transfer_monitor(100);
        sender.record(10);
        sender.record(60);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.transferred, 10);
        assert_eq!(second.transferred, 60);
    }

    #[tokio::test]
    async fn estimates_time_left_from_speed() {
        let (sender, mut rx) = transfer_monitor(1_000);
        std::thread::sleep(Duration::from_millis(5));
        sender.record(500);

        let sample = rx.recv().await.unwrap();
        assert!(sample.speed > 0.0);
        assert!(sample.time_left.is_some());
    }

    #[test]
    fn recording_after_receiver_drop_is_silent() {
        let (sender, rx) = transfer_monitor(10);
        drop(rx);
        sender.record(5);
    }
}
