//! Finished-call bookkeeping: history records and usage reporting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    /// When the call started (end time minus duration).
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u64,
    pub direction: CallDirection,
}

impl CallRecord {
    pub fn outgoing(ended_at: DateTime<Utc>, duration_seconds: u64) -> Self {
        let elapsed = chrono::Duration::seconds(i64::try_from(duration_seconds).unwrap_or(i64::MAX));
        Self {
            id: Uuid::new_v4(),
            timestamp: ended_at - elapsed,
            duration_seconds,
            direction: CallDirection::Outgoing,
        }
    }
}

/// Receives one record per finished call that lasted at least a second.
pub trait CallHistorySink: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Quota collaborator told how long each call ran.
pub trait UsageMeter: Send + Sync {
    fn report_usage(&self, seconds: u64);
}

/// In-memory history, newest first, holding at most `capacity` records.
#[derive(Debug)]
pub struct CallHistory {
    capacity: usize,
    records: Mutex<VecDeque<CallRecord>>,
}

impl CallHistory {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), records: Mutex::new(VecDeque::new()) }
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_seconds(&self) -> u64 {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.duration_seconds)
            .sum()
    }
}

impl Default for CallHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl CallHistorySink for CallHistory {
    fn record(&self, record: CallRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push_front(record);
        records.truncate(self.capacity);
    }
}

/// Running total of reported call seconds.
#[derive(Debug, Default)]
pub struct UsageTally(AtomicU64);

impl UsageTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seconds(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl UsageMeter for UsageTally {
    fn report_usage(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::Relaxed);
    }
}
