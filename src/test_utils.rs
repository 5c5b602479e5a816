// Helpers for exercising coordinators without real clocks or a real store

use crate::{
    handler::ErrorHandler,
    store::{LeaseStore, LockReply},
    time::{Clock, Timestamp},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(secs: f64) -> Self {
        Self {
            now: Mutex::new(Timestamp::from_secs_f64(secs)),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.now.lock() = Timestamp::from_secs_f64(secs);
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Wall clock driven by tokio's timer, so it follows paused test time.
#[derive(Debug)]
pub struct TokioClock {
    origin: Timestamp,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(secs: f64) -> Self {
        Self {
            origin: Timestamp::from_secs_f64(secs),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        self.origin + self.started.elapsed()
    }
}

/// Wraps a store and makes chosen calls fail, like a flaky network link.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn LeaseStore>,
    failures: AtomicUsize,
    panics: AtomicUsize,
    hangs: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LeaseStore>) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
            panics: AtomicUsize::new(0),
            hangs: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// The next `count` calls return a store error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` calls panic.
    pub fn panic_next(&self, count: usize) {
        self.panics.store(count, Ordering::SeqCst);
    }

    /// The next `count` calls never complete, like a blackholed connection.
    pub fn hang_next(&self, count: usize) {
        self.hangs.store(count, Ordering::SeqCst);
    }

    /// Calls seen so far, including the failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check(&self, key: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.panics) {
            panic!("injected store panic");
        }
        if Self::take(&self.failures) {
            return Err(Error::store(
                key,
                io::Error::new(io::ErrorKind::ConnectionReset, "injected store outage"),
            ));
        }
        Ok(())
    }

    async fn hang_if_asked(&self) {
        if Self::take(&self.hangs) {
            futures_util::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    async fn get_lock(&self, key: &str, now: Timestamp, candidate: Timestamp) -> Result<LockReply> {
        self.check(key)?;
        self.hang_if_asked().await;
        self.inner.get_lock(key, now, candidate).await
    }

    async fn extend_lock(&self, key: &str, token: Timestamp, candidate: Timestamp) -> Result<LockReply> {
        self.check(key)?;
        self.hang_if_asked().await;
        self.inner.extend_lock(key, token, candidate).await
    }
}

/// Collects the errors passed to an error handler.
#[derive(Debug, Clone, Default)]
pub struct RecordedErrors {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordedErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> ErrorHandler {
        Arc::new(self.handler_fn())
    }

    pub fn handler_fn(&self) -> impl Fn(&Error) + Send + Sync + 'static {
        let messages = self.messages.clone();
        move |err: &Error| messages.lock().push(err.to_string())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

/// In-memory log sink for asserting on emitted events.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber writing every event, down to `DEBUG`, into this buffer.
    pub fn dispatch(&self) -> Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLeaseStore;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100.0);
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Timestamp::from_secs_f64(100.5));

        clock.set(42.0);
        assert_eq!(clock.now(), Timestamp::from_secs_f64(42.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(1_000.0);
        tokio::time::sleep(Duration::from_secs(20)).await;

        let now = clock.now().as_secs_f64();
        assert!((now - 1_020.0).abs() < 0.01, "{now}");
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let store = FlakyStore::new(Arc::new(InMemoryLeaseStore::new()));
        store.fail_next(2);
        let now = Timestamp::from_secs_f64(1.0);
        let until = Timestamp::from_secs_f64(2.0);

        assert!(store.get_lock("k", now, until).await.is_err());
        assert!(store.extend_lock("k", now, until).await.is_err());
        assert!(store.get_lock("k", now, until).await.unwrap().acquired);
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_store_hangs_on_request() {
        let store = FlakyStore::new(Arc::new(InMemoryLeaseStore::new()));
        store.hang_next(1);
        let now = Timestamp::from_secs_f64(1.0);
        let until = Timestamp::from_secs_f64(2.0);

        let hung = tokio::time::timeout(Duration::from_secs(60), store.get_lock("k", now, until)).await;
        assert!(hung.is_err());
        assert!(store.get_lock("k", now, until).await.unwrap().acquired);
    }

    #[test]
    fn test_captured_logs() {
        let logs = CapturedLogs::new();
        tracing::dispatcher::with_default(&logs.dispatch(), || {
            tracing::debug!(attempt = 3, "lease renewed");
            tracing::trace!("too chatty");
        });

        assert!(logs.contains("lease renewed"));
        assert!(logs.contains("attempt=3"));
        assert!(!logs.contains("too chatty"));
        assert_eq!(logs.count("lease renewed"), 1);
    }
}
