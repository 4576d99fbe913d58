// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-engine counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Counters updated by one poll engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    cycles: AtomicU64,
    cycle_duration_us: AtomicU64,
    frames_ok: AtomicU64,
    frames_failed: AtomicU64,
    retries: AtomicU64,
    reconnects: AtomicU64,
    writes_ok: AtomicU64,
    writes_failed: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl EngineStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed cycle.
    pub fn record_cycle(&self, duration: Duration, frames_ok: usize, frames_failed: usize) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.frames_ok.fetch_add(frames_ok as u64, Ordering::Relaxed);
        self.frames_failed
            .fetch_add(frames_failed as u64, Ordering::Relaxed);
    }

    /// Records a retried attempt.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a discarded session.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a write outcome.
    pub fn record_write(&self, success: bool) {
        if success {
            self.writes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an error message.
    pub fn record_error(&self, error: &str) {
        *self.last_error.write() = Some(error.to_string());
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        let cycles = self.cycles.load(Ordering::Relaxed);
        let total_us = self.cycle_duration_us.load(Ordering::Relaxed);
        EngineStatsSnapshot {
            cycles,
            cycle_avg_duration: if cycles > 0 {
                Duration::from_micros(total_us / cycles)
            } else {
                Duration::ZERO
            },
            frames_ok: self.frames_ok.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatsSnapshot {
    /// Completed cycles.
    pub cycles: u64,
    /// Mean cycle duration.
    #[serde(with = "humantime_serde")]
    pub cycle_avg_duration: Duration,
    /// Frames that produced a reading.
    pub frames_ok: u64,
    /// Frames that exhausted their attempts or stopped on an error.
    pub frames_failed: u64,
    /// Extra attempts made.
    pub retries: u64,
    /// Sessions discarded after a transport failure.
    pub reconnects: u64,
    /// Successful writes.
    pub writes_ok: u64,
    /// Failed writes.
    pub writes_failed: u64,
    /// Most recent error message.
    pub last_error: Option<String>,
}
