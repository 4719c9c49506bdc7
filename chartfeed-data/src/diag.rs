//! Ingestion drop counters shared across the feed, batcher, and engine tasks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for events that are recovered locally rather than
/// surfaced as errors: rejected ticks, malformed frames, policy drops.
#[derive(Debug, Default)]
pub struct Diagnostics {
    ticks_ingested: AtomicU64,
    ticks_dropped: AtomicU64,
    frames_malformed: AtomicU64,
    late_ticks_dropped: AtomicU64,
    batches_applied: AtomicU64,
}

impl Diagnostics {
    pub fn record_ingested(&self) {
        self.ticks_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.ticks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_frame(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_dropped(&self, count: u64) {
        self.late_ticks_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_applied(&self) {
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot for logging and status displays.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            ticks_ingested: self.ticks_ingested.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            late_ticks_dropped: self.late_ticks_dropped.load(Ordering::Relaxed),
            batches_applied: self.batches_applied.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub ticks_ingested: u64,
    pub ticks_dropped: u64,
    pub frames_malformed: u64,
    pub late_ticks_dropped: u64,
    pub batches_applied: u64,
}
