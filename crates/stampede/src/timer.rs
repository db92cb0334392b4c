//! One-shot deadlines that can be awaited repeatedly from a `select!` loop.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// A re-armable one-shot deadline.
///
/// Polling `&mut Deadline` does not consume it, so the same deadline can sit
/// in a `tokio::select!` branch across loop iterations and be moved with
/// [`Deadline::reset_after`].
#[derive(Debug)]
pub struct Deadline {
    sleep: Pin<Box<Sleep>>,
}

impl Deadline {
    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(duration)),
        }
    }

    /// Move the deadline to `duration` from now. Durations past what an
    /// `Instant` can hold saturate to a far-future deadline.
    pub fn reset_after(&mut self, duration: Duration) {
        let now = Instant::now();
        let when = now.checked_add(duration).unwrap_or_else(|| far_future(now));
        self.sleep.as_mut().reset(when);
    }

    /// Whether the deadline has passed.
    pub fn is_elapsed(&self) -> bool {
        self.sleep.is_elapsed()
    }
}

// Roughly 30 years, the same horizon tokio::time::sleep saturates to.
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86400 * 365 * 30)
}

impl Future for &mut Deadline {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let start = Instant::now();
        let mut deadline = Deadline::after(Duration::from_secs(5));

        (&mut deadline).await;

        assert!(deadline.is_elapsed());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_moves_deadline_earlier() {
        let start = Instant::now();
        let mut deadline = Deadline::after(Duration::from_secs(3600));

        deadline.reset_after(Duration::from_secs(1));
        (&mut deadline).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_to_huge_duration_saturates() {
        let mut deadline = Deadline::after(Duration::from_secs(1));

        deadline.reset_after(Duration::from_secs(u64::MAX));
        tokio::time::advance(Duration::from_secs(86400 * 365)).await;

        assert!(!deadline.is_elapsed());
    }
}
