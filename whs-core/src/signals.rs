//! Unix signal handling for live control from outside the process (§4.1
//! "Signal semantics (unix)"). `SIGINT`/`SIGTERM` request shutdown, with a
//! second interrupt arriving inside the grace window escalating a graceful
//! shutdown to a forceful one; `SIGUSR1`/`SIGUSR2` enter and leave the
//! paused state respectively.
//!
//! Signal handlers may only touch async-signal-safe state, so the handlers
//! here do nothing but bump atomics; a background thread polls those
//! atomics and turns them into typed events on an `mpsc` channel the
//! coordinator selects on — the same thread-plus-channel idiom used
//! elsewhere in this design for worker results.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

/// A control event delivered to the coordinator (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    GracefulShutdown,
    ForcefulShutdown,
    Pause,
    Resume,
}

/// Window within which a second interrupt escalates to a forceful shutdown.
const ESCALATION_WINDOW: Duration = Duration::from_secs(2);
/// How often the poller thread checks the atomics.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

static INTERRUPT_COUNT: AtomicU32 = AtomicU32::new(0);
static PAUSE_COUNT: AtomicU32 = AtomicU32::new(0);
static RESUME_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(unix)]
extern "C" fn on_interrupt(_: libc::c_int) {
    INTERRUPT_COUNT.fetch_add(1, Ordering::SeqCst);
}

#[cfg(unix)]
extern "C" fn on_pause(_: libc::c_int) {
    PAUSE_COUNT.fetch_add(1, Ordering::SeqCst);
}

#[cfg(unix)]
extern "C" fn on_resume(_: libc::c_int) {
    RESUME_COUNT.fetch_add(1, Ordering::SeqCst);
}

/// Register handlers for `SIGINT`/`SIGTERM`/`SIGUSR1`/`SIGUSR2` and spawn the
/// poller thread. Returns the receiver the coordinator selects on.
#[cfg(unix)]
pub fn install() -> Receiver<SignalEvent> {
    // SAFETY: these handlers only write to `AtomicU32`s, which is
    // async-signal-safe; no allocation or locking happens in the handler.
    unsafe {
        libc::signal(libc::SIGINT, on_interrupt as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_interrupt as *const () as libc::sighandler_t);
        libc::signal(libc::SIGUSR1, on_pause as *const () as libc::sighandler_t);
        libc::signal(libc::SIGUSR2, on_resume as *const () as libc::sighandler_t);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || poll_loop(tx));
    rx
}

fn poll_loop(tx: Sender<SignalEvent>) {
    let mut tracker = InterruptTracker::new();
    let mut seen_pause = 0u32;
    let mut seen_resume = 0u32;

    loop {
        let interrupts = INTERRUPT_COUNT.swap(0, Ordering::SeqCst);
        for _ in 0..interrupts {
            if let Some(event) = tracker.record(Instant::now()) {
                if tx.send(event).is_err() {
                    return;
                }
            }
        }

        let pauses = PAUSE_COUNT.load(Ordering::SeqCst);
        if pauses != seen_pause {
            seen_pause = pauses;
            if tx.send(SignalEvent::Pause).is_err() {
                return;
            }
        }
        let resumes = RESUME_COUNT.load(Ordering::SeqCst);
        if resumes != seen_resume {
            seen_resume = resumes;
            if tx.send(SignalEvent::Resume).is_err() {
                return;
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Pure escalation logic, factored out of the poll loop so it can be unit
/// tested without real signal delivery.
struct InterruptTracker {
    last: Option<Instant>,
}

impl InterruptTracker {
    fn new() -> Self {
        Self { last: None }
    }

    /// Record one interrupt at `now`; returns the event it produces.
    fn record(&mut self, now: Instant) -> Option<SignalEvent> {
        let event = match self.last {
            Some(prev) if now.duration_since(prev) <= ESCALATION_WINDOW => {
                SignalEvent::ForcefulShutdown
            }
            _ => SignalEvent::GracefulShutdown,
        };
        self.last = Some(now);
        Some(event)
    }
}

#[cfg(not(unix))]
pub fn install() -> Receiver<SignalEvent> {
    let (_tx, rx) = std::sync::mpsc::channel();
    rx
}
