use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Upper bound for a single pause, so that a burst does not stall the receive loop for long
pub const MAX_PAUSE: Duration = Duration::from_secs(1);

/// Limits the average rate at which the receiver writes to its destination.
///
/// NB: This only slows down the receiver's own loop. Nothing of it is visible on the wire, so
///  the sender is not slowed down: while the receiver pauses, the sender's retransmission timer
///  keeps running.
pub struct WriteThrottle {
    max_bytes_per_sec: u64,
    started: Instant,
}

impl WriteThrottle {
    /// `None` for a rate of 0, which stands for 'unlimited'
    pub fn new(max_bytes_per_sec: u64) -> Option<WriteThrottle> {
        if max_bytes_per_sec == 0 {
            return None;
        }
        Some(WriteThrottle {
            max_bytes_per_sec,
            started: Instant::now(),
        })
    }

    /// The time to wait until the average rate for `bytes_written` is back at the limit
    pub fn pause_for(&self, bytes_written: u64) -> Option<Duration> {
        let target = Duration::from_secs_f64(bytes_written as f64 / self.max_bytes_per_sec as f64);
        let pause = target.checked_sub(self.started.elapsed())?;
        if pause.is_zero() {
            return None;
        }
        Some(pause.min(MAX_PAUSE))
    }

    pub async fn throttle(&self, bytes_written: u64) {
        if let Some(pause) = self.pause_for(bytes_written) {
            trace!("write rate above {} bytes/s - pausing for {:?}", self.max_bytes_per_sec, pause);
            tokio::time::sleep(pause).await;
        }
    }
}
