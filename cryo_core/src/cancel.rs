//! Stop tokens and interruptible waits.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cryo_traits::Clock;

/// Cancellation granularity of cycle dwell waits.
pub const DEFAULT_POLL: Duration = Duration::from_millis(500);

/// Shared one-way stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Completed,
    Interrupted,
}

/// Sleep for `total`, checking `token` every `poll`. Returns
/// [`Wait::Interrupted`] at the first check after cancellation.
pub fn sleep_interruptible<C: Clock + ?Sized>(
    clock: &C,
    total: Duration,
    poll: Duration,
    token: &CancelToken,
) -> Wait {
    let poll = poll.max(Duration::from_millis(1));
    let start = clock.now();
    let deadline = start.checked_add(total);
    loop {
        if token.is_cancelled() {
            return Wait::Interrupted;
        }
        let left = match deadline {
            Some(d) => clock.remaining(d),
            None => poll,
        };
        if left.is_zero() {
            return Wait::Completed;
        }
        clock.sleep(left.min(poll));
    }
}
