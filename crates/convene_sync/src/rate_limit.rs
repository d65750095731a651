//! Backpressure gate fed by remote busy responses.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::error::{SyncError, SyncResult};

/// Remembers the deadline the remote asked clients to stay away until.
///
/// Owned by the manager: the cleanup stage records backoff windows here and
/// every entry point consults the gate before touching the remote. Busy
/// rejections through this gate never reach the network.
#[derive(Debug, Default)]
pub struct RateLimiter {
    until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates an open gate.
    pub fn new() -> Self {
        RateLimiter::default()
    }

    /// Records a backoff window starting now. A longer existing window is
    /// kept.
    pub fn note_backoff(&self, retry_after: Duration) {
        self.note_backoff_at(Instant::now(), retry_after);
    }

    /// Records a backoff window starting at `now`.
    pub fn note_backoff_at(&self, now: Instant, retry_after: Duration) {
        let deadline = now + retry_after;
        let mut until = self.until.lock();
        let effective = match *until {
            Some(existing) if existing >= deadline => existing,
            _ => {
                info!(?retry_after, "remote requested backoff");
                deadline
            }
        };
        *until = Some(effective);
    }

    /// Clears any stored window.
    pub fn clear(&self) {
        *self.until.lock() = None;
    }

    /// Checks the gate at `now`: `Err(CloudBusy)` with the remaining window
    /// while the deadline is in the future.
    pub fn permit_at(&self, now: Instant) -> SyncResult<()> {
        if let Some(until) = *self.until.lock() {
            if now < until {
                return Err(SyncError::CloudBusy {
                    retry_after: until - now,
                });
            }
        }
        Ok(())
    }

    /// Checks the gate against the current time.
    pub fn permit_now(&self) -> SyncResult<()> {
        self.permit_at(Instant::now())
    }

    /// The stored deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        *self.until.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_gate_permits() {
        let limiter = RateLimiter::new();
        assert!(limiter.permit_now().is_ok());
    }

    #[test]
    fn backoff_blocks_until_deadline() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.note_backoff_at(now, Duration::from_secs(30));

        let blocked = limiter.permit_at(now + Duration::from_secs(10));
        match blocked {
            Err(SyncError::CloudBusy { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(20));
            }
            other => panic!("expected busy, got {other:?}"),
        }

        assert!(limiter.permit_at(now + Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn longer_window_is_kept() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.note_backoff_at(now, Duration::from_secs(60));
        limiter.note_backoff_at(now, Duration::from_secs(5));

        match limiter.permit_at(now + Duration::from_secs(30)) {
            Err(SyncError::CloudBusy { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected busy, got {other:?}"),
        }
    }

    #[test]
    fn clear_reopens_the_gate() {
        let limiter = RateLimiter::new();
        limiter.note_backoff(Duration::from_secs(600));
        assert!(limiter.permit_now().is_err());
        limiter.clear();
        assert!(limiter.permit_now().is_ok());
    }
}
