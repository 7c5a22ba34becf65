//! Bounded views derived from the stream: alert history, latest frame per
//! camera, latest stats snapshot.

use super::event::{Alert, Frame, StreamEvent};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Alert plus its position in arrival order and expiry flag
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedAlert {
    pub seq: u64,
    pub alert: Alert,
    /// Dropped from the "currently alerting" view, still kept as history
    pub expired: bool,
}

/// Newest-first alert history holding at most `capacity` entries
#[derive(Debug, Clone, PartialEq)]
pub struct AlertBuffer {
    entries: VecDeque<BufferedAlert>,
    capacity: usize,
    next_seq: u64,
}

impl AlertBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    /// Push to the front, evicting the oldest past capacity.
    /// Returns the sequence number assigned to the alert.
    pub fn push(&mut self, alert: Alert) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_front(BufferedAlert {
            seq,
            alert,
            expired: false,
        });
        self.entries.truncate(self.capacity);
        seq
    }

    /// Mark an alert expired; false if it was already evicted
    pub fn expire(&mut self, seq: u64) -> bool {
        match self.entries.iter_mut().find(|entry| entry.seq == seq) {
            Some(entry) => {
                entry.expired = true;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Alert at `index`, 0 being the newest
    pub fn get(&self, index: usize) -> Option<&Alert> {
        self.entries.get(index).map(|entry| &entry.alert)
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &BufferedAlert> {
        self.entries.iter()
    }
}

/// Latest frame per camera; no history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameCache {
    frames: HashMap<i64, String>,
}

impl FrameCache {
    pub fn insert(&mut self, frame: Frame) {
        self.frames.insert(frame.camera_id, frame.frame);
    }

    pub fn get(&self, camera_id: i64) -> Option<&str> {
        self.frames.get(&camera_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn camera_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.keys().copied()
    }
}

/// Everything the presentation layer reads
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub connected: bool,
    pub alerts: AlertBuffer,
    pub frames: FrameCache,
    /// Replaced wholesale by each STATS event
    pub stats: Option<Map<String, Value>>,
}

impl DashboardView {
    pub fn new(alert_capacity: usize) -> Self {
        Self {
            connected: false,
            alerts: AlertBuffer::new(alert_capacity),
            frames: FrameCache::default(),
            stats: None,
        }
    }

    /// Apply one event. Returns the sequence number for an ALERT.
    pub fn apply(&mut self, event: StreamEvent) -> Option<u64> {
        match event {
            StreamEvent::Alert(alert) => Some(self.alerts.push(alert)),
            StreamEvent::Frame(frame) => {
                self.frames.insert(frame);
                None
            }
            StreamEvent::Stats(stats) => {
                self.stats = Some(stats);
                None
            }
        }
    }

    /// Most recent unexpired alert per camera
    pub fn currently_alerting(&self) -> BTreeMap<i64, &Alert> {
        let mut alerting = BTreeMap::new();
        for entry in self.alerts.iter().filter(|entry| !entry.expired) {
            alerting.entry(entry.alert.camera_id).or_insert(&entry.alert);
        }
        alerting
    }
}
