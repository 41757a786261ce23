use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Time seam so the bootstrap wait and the backup scheduler can be driven
/// deterministically in tests.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Wall-clock counterpart of `now()`, for comparing against externally
    /// recorded timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[allow(dead_code)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);
    let clock = MockClock {
        current_time: rx,
        epoch_instant: now,
        epoch_utc: mock_epoch(),
    };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (clock, controller)
}

/// Fixed, arbitrary wall-clock origin for the mock timeline.
fn mock_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

#[allow(dead_code)]
#[derive(Clone)]
pub(crate) struct MockClock {
    current_time: watch::Receiver<Instant>,
    epoch_instant: Instant,
    epoch_utc: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let elapsed = self.now() - self.epoch_instant;
        self.epoch_utc
            + chrono::Duration::from_std(elapsed).expect("mock timeline out of chrono range")
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        loop {
            if *self.current_time.borrow() >= deadline {
                return;
            }

            self.current_time.changed().await.expect("Controller dropped");
        }
    }
}

#[allow(dead_code)]
pub(crate) struct MockClockController {
    current_time: watch::Sender<Instant>,
    time_of_instantiation: Instant,
}

#[allow(dead_code)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        *self.current_time.borrow()
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.current_time() - self.time_of_instantiation
    }

    /// Advancing by large steps of time can cause surprising behavior in
    /// `sleep_until()` usage. The only promise of mock `sleep_until` is that
    /// it will return when `now` is at or past the `deadline`. In general,
    /// advance the mock clock at much smaller increments than the granularity
    /// at which you wish to observe things. Much like a real clock.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let now = *self.current_time.borrow();
        let new_now = now + duration;
        self.current_time.send(new_now).expect("MockClock dropped");
    }
}
