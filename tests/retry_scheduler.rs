//! Retry scheduler sweeps: resend pacing, eviction, session reaping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use photon::core::time::Clock;
use photon::qos::backoff::LinearBackoff;
use photon::qos::scheduler::{RetryScheduler, RetryTarget};
use photon::qos::{ConnState, FrameSink, QosEngine, QosLevel, ReliableOptions};
use photon::session::{ClientIdentity, OfflineLimits, SessionStore};
use photon::wire::frame::{self, FrameType};

#[derive(Clone, Default)]
struct TestClock {
    millis: Arc<AtomicU64>,
}

impl TestClock {
    fn advance_ms(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

#[derive(Default)]
struct CaptureSink {
    frames: Mutex<Vec<Bytes>>,
}

impl CaptureSink {
    fn count(&self, ty: FrameType) -> usize {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|raw| frame::decode(raw).unwrap().frame_type == ty)
            .count()
    }
}

impl FrameSink for CaptureSink {
    fn send_frame(&self, frame: Bytes) -> bool {
        self.frames.lock().unwrap().push(frame);
        true
    }
}

fn options(level: QosLevel, max_retry: u32) -> Arc<ReliableOptions> {
    Arc::new(ReliableOptions {
        level,
        base_retry_ms: 10,
        max_retry,
        max_backoff_ms: 50,
        session_ttl_ms: 60_000,
        backoff: Arc::new(LinearBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        )),
        ..ReliableOptions::default()
    })
}

struct Fixture {
    scheduler: RetryScheduler<TestClock>,
    clock: TestClock,
    store: Arc<SessionStore>,
    state: Arc<ConnState>,
    sink: Arc<CaptureSink>,
    engine: QosEngine,
}

fn fixture(level: QosLevel, max_retry: u32) -> Fixture {
    let opts = options(level, max_retry);
    let store = Arc::new(SessionStore::new(
        opts.session_ttl_ms,
        OfflineLimits::default(),
    ));
    let state = Arc::new(ConnState::new());
    let sink = Arc::new(CaptureSink::default());
    let target = RetryTarget {
        state: state.clone(),
        sink: sink.clone(),
    };
    let clock = TestClock::default();
    let scheduler = RetryScheduler::new(
        Arc::new(move || vec![target.clone()]),
        store.clone(),
        opts.clone(),
        clock.clone(),
    );
    Fixture {
        scheduler,
        clock,
        store,
        state,
        sink,
        engine: QosEngine::new(opts),
    }
}

#[test]
fn due_qos1_frames_are_resent() {
    let f = fixture(QosLevel::AtLeastOnce, 3);
    f.engine.send(f.sink.as_ref(), &f.state, b"payload");
    assert_eq!(f.sink.count(FrameType::Data), 1);

    // Not yet due.
    f.scheduler.run_once(Instant::now());
    assert_eq!(f.sink.count(FrameType::Data), 1);

    // Past the first backoff delay.
    f.scheduler.run_once(Instant::now() + Duration::from_millis(15));
    assert_eq!(f.sink.count(FrameType::Data), 2);
}

#[test]
fn qos1_exhaustion_evicts_silently() {
    let f = fixture(QosLevel::AtLeastOnce, 2);
    f.engine.send(f.sink.as_ref(), &f.state, b"payload");

    let mut at = Instant::now();
    for _ in 0..10 {
        at += Duration::from_millis(60);
        f.scheduler.run_once(at);
    }
    // Initial send plus exactly max_retry resends.
    assert_eq!(f.sink.count(FrameType::Data), 3);
    assert_eq!(f.state.pending1_len(), 0);
}

#[test]
fn qos2_prepare_is_redriven_and_evicted() {
    let f = fixture(QosLevel::ExactlyOnce, 2);
    f.engine.send(f.sink.as_ref(), &f.state, b"payload");
    assert_eq!(f.sink.count(FrameType::Prepare), 1);

    let mut at = Instant::now();
    for _ in 0..10 {
        at += Duration::from_millis(60);
        f.scheduler.run_once(at);
    }
    assert_eq!(f.sink.count(FrameType::Prepare), 3);
    assert_eq!(f.state.pending2_len(), 0);
}

#[test]
fn unbounded_retries_keep_driving() {
    let f = fixture(QosLevel::AtLeastOnce, 0);
    f.engine.send(f.sink.as_ref(), &f.state, b"payload");

    let mut at = Instant::now();
    for _ in 0..6 {
        at += Duration::from_millis(60);
        f.scheduler.run_once(at);
    }
    assert_eq!(f.sink.count(FrameType::Data), 7);
    assert_eq!(f.state.pending1_len(), 1);
}

#[test]
fn expired_offline_sessions_reaped_on_sweep() {
    let f = fixture(QosLevel::AtLeastOnce, 3);
    let session = f
        .store
        .get_or_create(ClientIdentity::new("u", 1), f.clock.now_millis());
    let sid = session.id().to_string();

    f.scheduler.run_once(Instant::now());
    assert!(f.store.get(&sid).is_some());

    f.clock.advance_ms(61_000);
    f.scheduler.run_once(Instant::now());
    assert!(f.store.get(&sid).is_none());
}

#[tokio::test]
async fn scheduler_task_stops_within_a_tick() {
    let f = fixture(QosLevel::AtLeastOnce, 3);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = f.scheduler.spawn(rx);
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("scheduler did not stop in time")
        .unwrap();
}
