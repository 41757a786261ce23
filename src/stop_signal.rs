use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot cancellation pair for the backup scheduler. Dropping the
/// `Stopper` makes the paired `StopCheck` report stop at the loop's next
/// decision point; since dropping is the only way to signal, the scheduler
/// can never outlive the handle that owns it.
pub fn new() -> (Stopper, StopCheck) {
    let stopped = Arc::new(AtomicBool::new(false));

    (
        Stopper {
            stopped: Arc::clone(&stopped),
        },
        StopCheck { stopped },
    )
}

pub struct Stopper {
    stopped: Arc<AtomicBool>,
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

pub struct StopCheck {
    stopped: Arc<AtomicBool>,
}

impl StopCheck {
    pub fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
