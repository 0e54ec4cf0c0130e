//! Handing sessions back to their runtime.
//!
//! Some native close calls can hang on USB I/O. Those sessions are moved into
//! a detached thread so the caller's shutdown path never waits on the
//! driver. The session is transferred, not shared: the release thread only
//! owns the session, an outstanding counter, and a sender for
//! [`ReleaseEvent`]s.

use crate::backend::Session;
use crate::types::BackendKind;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bound on undrained release events. Older events are dropped past this.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Close on the calling thread before returning.
    Inline,
    /// Fire-and-forget close on a detached thread.
    Detached,
}

/// Notification that a session's native close returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub id: u64,
    pub kind: BackendKind,
    pub mode: ReleaseMode,
    /// Time spent inside the native close.
    pub elapsed: Duration,
}

/// Counts of releases started, by mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseStats {
    pub inline: u64,
    pub detached: u64,
}

/// Owns the release bookkeeping for one tracker.
pub struct Releaser {
    next_id: u64,
    stats: ReleaseStats,
    outstanding: Arc<AtomicUsize>,
    sender: Sender<ReleaseEvent>,
    receiver: Receiver<ReleaseEvent>,
}

impl Releaser {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(EVENT_CAPACITY);
        Self {
            next_id: 0,
            stats: ReleaseStats::default(),
            outstanding: Arc::new(AtomicUsize::new(0)),
            sender,
            receiver,
        }
    }

    /// Release `session` in the given mode and return the release id.
    pub fn release(&mut self, session: Box<dyn Session>, mode: ReleaseMode) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        match mode {
            ReleaseMode::Inline => self.release_inline(id, session),
            ReleaseMode::Detached => self.release_detached(id, session),
        }
        id
    }

    fn release_inline(&mut self, id: u64, session: Box<dyn Session>) {
        self.stats.inline += 1;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        close_and_report(
            id,
            session,
            ReleaseMode::Inline,
            &self.outstanding,
            &self.sender,
        );
    }

    /// Fire-and-forget release. The thread is never joined.
    fn release_detached(&mut self, id: u64, session: Box<dyn Session>) {
        self.stats.detached += 1;
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        // Hand-off slot. We keep a receiver so a failed spawn can take the
        // session back and close it inline instead of leaking it.
        let (slot_tx, slot_rx) = crossbeam_channel::bounded::<Box<dyn Session>>(1);
        let thread_rx = slot_rx.clone();
        if let Err(e) = slot_tx.send(session) {
            close_and_report(
                id,
                e.into_inner(),
                ReleaseMode::Inline,
                &self.outstanding,
                &self.sender,
            );
            return;
        }

        let outstanding = self.outstanding.clone();
        let sender = self.sender.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("vive-release-{}", id))
            .spawn(move || {
                if let Ok(session) = thread_rx.recv() {
                    close_and_report(id, session, ReleaseMode::Detached, &outstanding, &sender);
                }
            });

        if let Err(e) = spawned {
            log::warn!("Failed to spawn release thread ({}), closing inline", e);
            self.stats.detached -= 1;
            self.stats.inline += 1;
            if let Ok(session) = slot_rx.try_recv() {
                close_and_report(
                    id,
                    session,
                    ReleaseMode::Inline,
                    &self.outstanding,
                    &self.sender,
                );
            }
        }
    }

    pub fn stats(&self) -> ReleaseStats {
        self.stats
    }

    /// Releases whose native close has not returned yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every release finished or `timeout` passed. Returns true
    /// when nothing is outstanding.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.outstanding() == 0 {
                return true;
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return false;
            }
            // Events only wake us up; the counter is authoritative.
            match self
                .receiver
                .recv_timeout(remaining.min(Duration::from_millis(50)))
            {
                Ok(event) => log::trace!("Release event: {:?}", event),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return self.outstanding() == 0;
                }
            }
        }
    }

    /// Drain release events received so far. Events consumed by
    /// [`wait_idle`](Self::wait_idle) are not returned again.
    pub fn drain_events(&self) -> Vec<ReleaseEvent> {
        self.receiver.try_iter().collect()
    }
}

impl Default for Releaser {
    fn default() -> Self {
        Self::new()
    }
}

fn close_and_report(
    id: u64,
    session: Box<dyn Session>,
    mode: ReleaseMode,
    outstanding: &AtomicUsize,
    sender: &Sender<ReleaseEvent>,
) {
    let kind = session.kind();
    let started = Instant::now();
    session.close();
    let elapsed = started.elapsed();
    outstanding.fetch_sub(1, Ordering::SeqCst);

    log::debug!(
        "Released {} session #{} ({:?}) in {:?}",
        kind,
        id,
        mode,
        elapsed
    );

    let event = ReleaseEvent {
        id,
        kind,
        mode,
        elapsed,
    };
    if let Err(crossbeam_channel::TrySendError::Full(_)) = sender.try_send(event) {
        log::trace!("Release event channel full, dropping event #{}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;

    #[test]
    fn inline_release_closes_before_returning() {
        let runtime = MockRuntime::new();
        let mut releaser = Releaser::new();

        let id = releaser.release(runtime.session(), ReleaseMode::Inline);

        assert_eq!(runtime.with(|s| s.closes), 1);
        assert_eq!(runtime.with(|s| s.open_sessions), 0);
        assert_eq!(releaser.outstanding(), 0);
        assert_eq!(releaser.stats(), ReleaseStats { inline: 1, detached: 0 });

        let events = releaser.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].mode, ReleaseMode::Inline);
    }

    #[test]
    fn detached_release_does_not_block_caller() {
        let runtime = MockRuntime::new();
        runtime.with(|s| s.close_delay = Duration::from_millis(300));
        let closed = runtime.closed();
        let mut releaser = Releaser::new();

        let started = Instant::now();
        releaser.release(runtime.session(), ReleaseMode::Detached);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(releaser.stats(), ReleaseStats { inline: 0, detached: 1 });

        assert_eq!(closed.recv_timeout(Duration::from_secs(5)), Ok(1));
        assert!(releaser.wait_idle(Duration::from_secs(5)));
        assert_eq!(runtime.with(|s| s.open_sessions), 0);
    }

    #[test]
    fn wait_idle_gives_up_at_timeout() {
        let runtime = MockRuntime::new();
        runtime.with(|s| s.close_delay = Duration::from_millis(500));
        let mut releaser = Releaser::new();

        releaser.release(runtime.session(), ReleaseMode::Detached);
        let started = Instant::now();
        assert!(!releaser.wait_idle(Duration::from_millis(20)));
        assert!(started.elapsed() < Duration::from_millis(400));

        assert!(releaser.wait_idle(Duration::from_secs(5)));
        assert_eq!(runtime.with(|s| s.closes), 1);
    }

    #[test]
    fn wait_idle_accepts_unbounded_timeout() {
        let runtime = MockRuntime::new();
        runtime.with(|s| s.close_delay = Duration::from_millis(20));
        let mut releaser = Releaser::new();

        releaser.release(runtime.session(), ReleaseMode::Detached);
        assert!(releaser.wait_idle(Duration::MAX));
        assert_eq!(releaser.outstanding(), 0);
    }
}
