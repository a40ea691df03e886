//! ============================================================================
//! Scan Loop - poll, debounce, resolve, show
//! ============================================================================
//! One iteration:
//! 1. run a full sync or heartbeat if one is due
//! 2. poll the card reader (1 s timeout)
//! 3. debounce the read and resolve new scans into a held color
//!
//! An unreachable store only skips the sync; scans keep resolving against the
//! cached tables and the sync is retried one check-in interval later. Other
//! errors inside an iteration pause the loop for a minute. Interrupts and
//! reader failures end it; either way the feedback task is stopped and the
//! reader closed before `run` returns.
//! ============================================================================

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::feedback::Feedback;
use crate::hardware::{CardPoll, CardReader};
use crate::session::ReaderSession;
use crate::store::KeyedTableStore;
use crate::types::{RoomgateError, RoomgateResult};

/// Reads a token must be absent from to count again, the current one included
pub const DEBOUNCE_WINDOW: usize = 5;

pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);
pub const ERROR_PAUSE: Duration = Duration::from_secs(60);

/// Recent reads. Empty polls take a slot too, so a card held away for a few
/// polls can be scanned again.
#[derive(Debug, Clone)]
pub struct DebounceRing {
    slots: VecDeque<Option<String>>,
}

impl Default for DebounceRing {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceRing {
    pub fn new() -> Self {
        let previous = DEBOUNCE_WINDOW - 1;
        Self {
            slots: std::iter::repeat(None).take(previous).collect(),
        }
    }

    fn push(&mut self, read: Option<String>) {
        self.slots.pop_front();
        self.slots.push_back(read);
    }

    /// Record a poll result. Returns true when `read` is a new scan.
    /// Repeats of a recent token are ignored without taking a slot.
    pub fn observe(&mut self, read: Option<&str>) -> bool {
        match read.filter(|t| !t.is_empty()) {
            Some(token) => {
                if self.slots.iter().any(|s| s.as_deref() == Some(token)) {
                    return false;
                }
                self.push(Some(token.to_string()));
                true
            }
            None => {
                self.push(None);
                false
            }
        }
    }
}

/// Wall clock used for the sync schedule
pub type Clock = Box<dyn Fn() -> DateTime<Local> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Interrupted,
    HardwareError(String),
}

pub struct ScanLoop<S, R> {
    session: ReaderSession<S>,
    reader: R,
    feedback: Feedback,
    ring: DebounceRing,
    poll_timeout: Duration,
    error_pause: Duration,
    clock: Clock,
    scans: usize,
}

impl<S: KeyedTableStore, R: CardReader> ScanLoop<S, R> {
    pub fn new(session: ReaderSession<S>, reader: R, feedback: Feedback) -> Self {
        Self {
            session,
            reader,
            feedback,
            ring: DebounceRing::new(),
            poll_timeout: POLL_TIMEOUT,
            error_pause: ERROR_PAUSE,
            clock: Box::new(Local::now),
            scans: 0,
        }
    }

    /// Replace the wall clock the sync schedule is checked against
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn session(&self) -> &ReaderSession<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ReaderSession<S> {
        &mut self.session
    }

    /// New scans resolved so far
    pub fn scans(&self) -> usize {
        self.scans
    }

    /// One loop iteration; `Some` means the loop must stop
    pub async fn step(&mut self) -> RoomgateResult<Option<ExitReason>> {
        match self.session.sync_if_due((self.clock)()).await {
            Ok(_) => {}
            Err(RoomgateError::RemoteUnavailable(e)) => {
                warn!("Sync skipped, scanning with cached tables: {}", e);
            }
            Err(e) => return Err(e),
        }

        match self.reader.poll_token(self.poll_timeout).await {
            CardPoll::Token(token) => {
                if !self.ring.observe(Some(&token)) {
                    return Ok(None);
                }
                self.scans += 1;
                let resolved = self.session.resolve(&token).await;
                match resolved.grant() {
                    Some(grant) => {
                        info!("Card {}: {} ({})", token, resolved.audit_label(), grant.color);
                        self.feedback.hold(grant.color).await;
                    }
                    None => warn!("Card {}: nothing to show ({})", token, resolved.audit_label()),
                }
            }
            CardPoll::Empty => {
                self.ring.observe(None);
            }
            CardPoll::Error(e) => {
                error!("Card reader failed: {}", e);
                return Ok(Some(ExitReason::HardwareError(e)));
            }
        }
        Ok(None)
    }

    /// Run until `shutdown` resolves or the reader fails
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> ExitReason {
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => break ExitReason::Interrupted,
                result = self.step() => match result {
                    Ok(Some(reason)) => break reason,
                    Ok(None) => {}
                    Err(e) => {
                        error!("Scan loop error: {}, pausing {:?}", e, self.error_pause);
                        tokio::select! {
                            _ = &mut shutdown => break ExitReason::Interrupted,
                            _ = sleep(self.error_pause) => {}
                        }
                    }
                },
            }
        };

        info!("Stopping scan loop: {:?}", reason);
        self.feedback.shutdown().await;
        self.reader.close().await;
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{cache_with, seeded_store};
    use crate::cache::LoadMode;
    use crate::feedback::tests::RecordingStrip;
    use crate::feedback::FeedbackConfig;
    use crate::store::MemoryStore;
    use crate::sync::SyncSchedule;
    use crate::types::Color;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn run_ring(reads: &[Option<&str>]) -> usize {
        let mut ring = DebounceRing::new();
        reads.iter().filter(|r| ring.observe(**r)).count()
    }

    #[test]
    fn test_repeated_token_resolves_once() {
        assert_eq!(run_ring(&[Some("A1"), Some("A1"), Some("A1")]), 1);
    }

    #[test]
    fn test_token_returns_after_four_empty_reads() {
        let reads = [Some("A1"), None, None, None, None, Some("A1")];
        assert_eq!(run_ring(&reads), 2);

        let too_soon = [Some("A1"), None, None, None, Some("A1")];
        assert_eq!(run_ring(&too_soon), 1);
    }

    #[test]
    fn test_other_tokens_share_the_window() {
        let reads = [Some("A1"), Some("B2"), Some("C3"), Some("D4"), Some("E5"), Some("A1")];
        assert_eq!(run_ring(&reads), 6);
        assert_eq!(run_ring(&[Some(""), Some("A1"), None]), 1);
    }

    /// Replays a script, then reports idle polls forever
    struct ScriptedReader {
        script: VecDeque<CardPoll>,
        polls: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedReader {
        fn new(script: Vec<CardPoll>) -> Self {
            Self {
                script: script.into(),
                polls: Arc::default(),
                closed: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl CardReader for ScriptedReader {
        async fn poll_token(&mut self, timeout: Duration) -> CardPoll {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(CardPoll::Empty) | None => {
                    sleep(timeout).await;
                    CardPoll::Empty
                }
                Some(poll) => poll,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    async fn started(
        store: Arc<MemoryStore>,
        schedule: SyncSchedule,
    ) -> ReaderSession<Arc<MemoryStore>> {
        let mut session = ReaderSession::new(cache_with(store, 1), schedule, true);
        session.start(LoadMode::Limited).await.unwrap();
        session
    }

    fn token(t: &str) -> CardPoll {
        CardPoll::Token(t.to_string())
    }

    /// Wall clock that follows tokio's paused time
    fn paused_clock() -> impl Fn() -> DateTime<Local> + Send + Sync + 'static {
        let origin = tokio::time::Instant::now();
        let base = Local::now();
        move || {
            base + chrono::Duration::from_std(origin.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_resolves_and_stops_on_reader_error() {
        let store = Arc::new(seeded_store());
        let session = started(store.clone(), SyncSchedule::default()).await;
        let strip = RecordingStrip::default();
        let frames = strip.frames.clone();
        let reader = ScriptedReader::new(vec![
            token("A1"),
            token("A1"),
            CardPoll::Empty,
            token("ZZ"),
            CardPoll::Error("spi timeout".into()),
        ]);
        let closed = reader.closed.clone();

        let feedback = Feedback::spawn(strip, FeedbackConfig::default());
        let mut scan = ScanLoop::new(session, reader, feedback);
        let reason = scan.run(std::future::pending()).await;

        assert_eq!(reason, ExitReason::HardwareError("spi timeout".into()));
        assert_eq!(scan.scans(), 2);
        assert!(closed.load(Ordering::SeqCst));

        // header + one audit row per resolved scan
        assert_eq!(store.sheet("Log").len(), 3);
        assert_eq!(store.cell("Log", 1, 7), "Lab");
        assert_eq!(store.cell("Log", 2, 7), "Unknown");

        let frames = frames.lock().unwrap();
        assert!(frames.iter().any(|(c, _)| *c == Color { r: 0, g: 255, b: 0 }));
        assert_eq!(frames.last().map(|(c, _)| *c), Some(Color::BLACK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_closes_reader() {
        let store = Arc::new(seeded_store());
        let session = started(store, SyncSchedule::default()).await;
        let reader = ScriptedReader::new(Vec::new());
        let closed = reader.closed.clone();

        let feedback = Feedback::spawn(RecordingStrip::default(), FeedbackConfig::default());
        let mut scan = ScanLoop::new(session, reader, feedback);
        let reason = scan.run(sleep(Duration::from_secs(5))).await;

        assert_eq!(reason, ExitReason::Interrupted);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scans_continue_while_store_is_down() {
        let store = Arc::new(seeded_store());
        let session = started(store.clone(), SyncSchedule::default()).await;
        for sheet in ["Readers", "Students", "Staff", "Modules", "Accesses"] {
            store.fail_sheet(sheet);
        }
        let readers_before = store
            .read_log()
            .iter()
            .filter(|r| r.starts_with("Readers"))
            .count();

        // 40 idle polls let the 30 s heartbeat come due and fail
        let mut script = vec![CardPoll::Empty; 40];
        script.push(token("A1"));
        script.push(CardPoll::Error("unplugged".into()));
        let reader = ScriptedReader::new(script);
        let polls = reader.polls.clone();
        let strip = RecordingStrip::default();
        let frames = strip.frames.clone();

        let feedback = Feedback::spawn(strip, FeedbackConfig::default());
        let mut scan = ScanLoop::new(session, reader, feedback).with_clock(paused_clock());
        let reason = scan.run(sleep(Duration::from_secs(600))).await;

        assert_eq!(reason, ExitReason::HardwareError("unplugged".into()));
        assert_eq!(polls.load(Ordering::SeqCst), 42);
        assert_eq!(scan.scans(), 1);
        assert!(scan.session().state().last_failed_sync.is_some());
        // one failed heartbeat, no retry within the interval
        let readers_after = store
            .read_log()
            .iter()
            .filter(|r| r.starts_with("Readers"))
            .count();
        assert_eq!(readers_after, readers_before + 1);
        assert!(frames
            .lock()
            .unwrap()
            .iter()
            .any(|(c, _)| *c == Color { r: 0, g: 255, b: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_sync_errors_pause_before_polling() {
        let store = Arc::new(seeded_store());
        let every_iteration = SyncSchedule {
            checkin_interval: Duration::ZERO,
            ..SyncSchedule::default()
        };
        let session = started(store.clone(), every_iteration).await;
        // reader 1's row disappears: check-in fails with NotFound
        store.set_sheet("Readers", vec![vec!["id"], vec!["0"]]);

        let reader = ScriptedReader::new(vec![token("A1")]);
        let polls = reader.polls.clone();
        let closed = reader.closed.clone();

        let feedback = Feedback::spawn(RecordingStrip::default(), FeedbackConfig::default());
        let mut scan = ScanLoop::new(session, reader, feedback).with_clock(paused_clock());
        let reason = scan.run(sleep(Duration::from_secs(30))).await;

        assert_eq!(reason, ExitReason::Interrupted);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert_eq!(scan.scans(), 0);
        assert!(closed.load(Ordering::SeqCst));
    }
}
