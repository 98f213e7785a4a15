use std::time::{Duration, Instant};

/// Clock abstraction to enforce deterministic time sourcing in core paths.
///
/// Retry deadlines and the seen-id window compare against `now()`; session
/// expiry bookkeeping uses `now_millis()` so stored deadlines stay plain
/// integers.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn now_millis(&self) -> u64;
    fn sleep(&self, duration: Duration) -> tokio::time::Sleep;
}

/// System-backed clock; replaceable in tests or deterministic replay.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_millis(&self) -> u64 {
        monotonic_millis()
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Milliseconds since an arbitrary process-local epoch, monotonic.
///
/// Session expiry deadlines are only ever compared against other values
/// from this function, so the epoch never needs wall-clock anchoring.
pub fn monotonic_millis() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}
