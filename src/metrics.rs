//! Process-wide bridge counters.
//!
//! Plain atomics behind free functions so any task can bump them without threading a handle
//! around. The server logs a [`snapshot`] periodically.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static PACKETS_SEEN: AtomicU64 = AtomicU64::new(0);
static PACKETS_IGNORED: AtomicU64 = AtomicU64::new(0);
static REPLIES_SENT: AtomicU64 = AtomicU64::new(0);
static GENERATION_FAILURES: AtomicU64 = AtomicU64::new(0);
static SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
static GENERATION_MS_SUM: AtomicU64 = AtomicU64::new(0);
static GENERATION_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn inc_packets_seen() {
    PACKETS_SEEN.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_packets_ignored() {
    PACKETS_IGNORED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_replies_sent() {
    REPLIES_SENT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_generation_failures() {
    GENERATION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_send_failures() {
    SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn observe_generation(elapsed: Duration) {
    GENERATION_MS_SUM.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    GENERATION_COUNT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub packets_seen: u64,
    pub packets_ignored: u64,
    pub replies_sent: u64,
    pub generation_failures: u64,
    pub send_failures: u64,
    pub generation_avg_ms: Option<u64>,
}

pub fn snapshot() -> Snapshot {
    let sum = GENERATION_MS_SUM.load(Ordering::Relaxed);
    let count = GENERATION_COUNT.load(Ordering::Relaxed);
    Snapshot {
        packets_seen: PACKETS_SEEN.load(Ordering::Relaxed),
        packets_ignored: PACKETS_IGNORED.load(Ordering::Relaxed),
        replies_sent: REPLIES_SENT.load(Ordering::Relaxed),
        generation_failures: GENERATION_FAILURES.load(Ordering::Relaxed),
        send_failures: SEND_FAILURES.load(Ordering::Relaxed),
        generation_avg_ms: if count > 0 { Some(sum / count) } else { None },
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} ignored={} replies={} gen_failures={} send_failures={}",
            self.packets_seen,
            self.packets_ignored,
            self.replies_sent,
            self.generation_failures,
            self.send_failures
        )?;
        match self.generation_avg_ms {
            Some(ms) => write!(f, " gen_avg={}ms", ms),
            None => write!(f, " gen_avg=n/a"),
        }
    }
}
