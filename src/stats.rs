//! # Statistics Module
//!
//! Collects metrics about the engine's operation.
//!
//! ## Overview
//!
//! The `StatCollector` counts the events this core is responsible for:
//! context pool traffic, emitted items and files, requests handed to (or
//! refused by) the scheduler, and decode fallbacks. The counters are plain
//! atomics so parse workers update them without coordination; a snapshot
//! gives a consistent-enough view for reporting.
//!
//! A collector is shared by handing `Arc<StatCollector>` to the context
//! pool; every context acquired from that pool reports into it.

use crate::error::SpiderError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// A snapshot of the current statistics, used for reporting.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub contexts_acquired: usize,
    pub contexts_recycled: usize,
    pub items_emitted: usize,
    pub files_emitted: usize,
    pub requests_enqueued: usize,
    pub requests_dropped: usize,
    pub decode_fallbacks: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl StatsSnapshot {
    fn items_per_second(&self) -> f64 {
        let total_seconds = self.elapsed.as_secs();
        if total_seconds > 0 {
            self.items_emitted as f64 / total_seconds as f64
        } else {
            0.0
        }
    }
}

/// Counts engine events across all contexts sharing this collector.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    pub contexts_acquired: AtomicUsize,
    pub contexts_recycled: AtomicUsize,
    pub items_emitted: AtomicUsize,
    pub files_emitted: AtomicUsize,
    pub requests_enqueued: AtomicUsize,
    pub requests_dropped: AtomicUsize,
    pub decode_fallbacks: AtomicUsize,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters at zero.
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            contexts_acquired: AtomicUsize::new(0),
            contexts_recycled: AtomicUsize::new(0),
            items_emitted: AtomicUsize::new(0),
            files_emitted: AtomicUsize::new(0),
            requests_enqueued: AtomicUsize::new(0),
            requests_dropped: AtomicUsize::new(0),
            decode_fallbacks: AtomicUsize::new(0),
        }
    }

    /// Creates a consistent snapshot of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            contexts_acquired: self.contexts_acquired.load(Ordering::SeqCst),
            contexts_recycled: self.contexts_recycled.load(Ordering::SeqCst),
            items_emitted: self.items_emitted.load(Ordering::SeqCst),
            files_emitted: self.files_emitted.load(Ordering::SeqCst),
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_dropped: self.requests_dropped.load(Ordering::SeqCst),
            decode_fallbacks: self.decode_fallbacks.load(Ordering::SeqCst),
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_contexts_acquired(&self) {
        self.contexts_acquired.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_contexts_recycled(&self) {
        self.contexts_recycled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_emitted(&self) {
        self.items_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_files_emitted(&self) {
        self.files_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_decode_fallbacks(&self) {
        self.decode_fallbacks.fetch_add(1, Ordering::SeqCst);
    }

    /// Converts a snapshot into a JSON string.
    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        serde_json::to_string(&self.snapshot())
            .map_err(|e| SpiderError::GeneralError(format!("failed to serialize stats: {e}")))
    }

    /// Converts a snapshot into a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| SpiderError::GeneralError(format!("failed to serialize stats: {e}")))
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nEngine Statistics")?;
        writeln!(f, "-----------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed)?;
        writeln!(
            f,
            "  contexts : acquired: {}, recycled: {}",
            snapshot.contexts_acquired, snapshot.contexts_recycled
        )?;
        writeln!(
            f,
            "  output   : items: {} ({:.2}/s), files: {}",
            snapshot.items_emitted,
            snapshot.items_per_second(),
            snapshot.files_emitted
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, dropped: {}",
            snapshot.requests_enqueued, snapshot.requests_dropped
        )?;
        writeln!(f, "  decoding : fallbacks: {}\n", snapshot.decode_fallbacks)
    }
}
