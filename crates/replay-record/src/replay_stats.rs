//! Replay statistics per view
//!
//! Reported alongside view events so the backend knows how much replay data
//! to expect. Only the most recent views are kept.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

pub const MAX_STATS_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ViewReplayStats {
    pub records_count: u64,
    pub segments_count: u64,
    pub segments_total_raw_size: u64,
}

#[derive(Debug, Default)]
pub struct ReplayStats {
    views: HashMap<String, ViewReplayStats>,
    order: VecDeque<String>,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, view_id: &str) -> Option<ViewReplayStats> {
        self.views.get(view_id).copied()
    }

    pub fn segments_count(&self, view_id: &str) -> u64 {
        self.get(view_id).map_or(0, |stats| stats.segments_count)
    }

    pub fn add_segment(&mut self, view_id: &str) {
        self.entry(view_id).segments_count += 1;
    }

    pub fn add_record(&mut self, view_id: &str) {
        self.entry(view_id).records_count += 1;
    }

    pub fn add_wrote_data(&mut self, view_id: &str, raw_bytes_count: usize) {
        self.entry(view_id).segments_total_raw_size += raw_bytes_count as u64;
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    fn entry(&mut self, view_id: &str) -> &mut ViewReplayStats {
        if !self.views.contains_key(view_id) {
            self.order.push_back(view_id.to_string());
            if self.order.len() > MAX_STATS_HISTORY {
                if let Some(oldest) = self.order.pop_front() {
                    self.views.remove(&oldest);
                }
            }
        }
        self.views.entry(view_id.to_string()).or_default()
    }
}
