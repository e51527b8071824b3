use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::{
    lane::is_system_lane,
    task::{QueueEntry, TaskId},
};

pub(crate) struct LaneState {
    pub lane: String,
    pub queue: VecDeque<QueueEntry>,
    pub active_task_ids: HashSet<TaskId>,
    pub max_concurrent: usize,
    /// Bumped by a reset. Completions carrying an older value are ignored.
    pub generation: u64,
    /// Set while one `pump` call owns handing out starts for this lane.
    pub pumping: bool,
    pub last_activity_at_ms: u64,
}

impl LaneState {
    fn new(lane: &str, now_ms: u64) -> Self {
        Self {
            lane: lane.to_string(),
            queue: VecDeque::new(),
            active_task_ids: HashSet::new(),
            max_concurrent: 1,
            generation: 0,
            pumping: false,
            last_activity_at_ms: now_ms,
        }
    }

    pub fn active(&self) -> usize {
        self.active_task_ids.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active_task_ids.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.active() < self.max_concurrent
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            lane: self.lane.clone(),
            queued: self.queue.len(),
            active: self.active(),
            max_concurrent: self.max_concurrent,
            generation: self.generation,
            last_activity_at_ms: self.last_activity_at_ms,
            system: is_system_lane(&self.lane),
        }
    }
}

/// Point-in-time view of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSnapshot {
    pub lane: String,
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub generation: u64,
    pub last_activity_at_ms: u64,
    pub system: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneStats {
    pub total_lanes: usize,
    pub idle_lanes: usize,
    pub busy_lanes: usize,
    pub system_lanes: usize,
}

#[derive(Default)]
pub(crate) struct LaneRegistry {
    lanes: HashMap<String, LaneState>,
}

impl LaneRegistry {
    pub fn get(&self, lane: &str) -> Option<&LaneState> {
        self.lanes.get(lane)
    }

    pub fn get_mut(&mut self, lane: &str) -> Option<&mut LaneState> {
        self.lanes.get_mut(lane)
    }

    pub fn get_or_create(&mut self, lane: &str, now_ms: u64) -> &mut LaneState {
        self.lanes
            .entry(lane.to_string())
            .or_insert_with(|| LaneState::new(lane, now_ms))
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LaneState> {
        self.lanes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LaneState> {
        self.lanes.values_mut()
    }

    /// Remove a non-system lane with nothing queued or running.
    pub fn remove_if_idle(&mut self, lane: &str) -> bool {
        if is_system_lane(lane) {
            return false;
        }
        match self.lanes.get(lane) {
            Some(state) if state.is_idle() => {
                self.lanes.remove(lane);
                true
            },
            _ => false,
        }
    }

    /// Remove idle non-system lanes untouched for longer than `ttl_ms`.
    pub fn remove_stale(&mut self, now_ms: u64, ttl_ms: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .lanes
            .values()
            .filter(|s| {
                !is_system_lane(&s.lane)
                    && s.is_idle()
                    && now_ms.saturating_sub(s.last_activity_at_ms) > ttl_ms
            })
            .map(|s| s.lane.clone())
            .collect();
        for lane in &stale {
            self.lanes.remove(lane);
        }
        stale
    }

    /// Remove the least recently active idle non-system lanes until at most
    /// `max_lanes` remain, or no candidates are left.
    pub fn evict_excess(&mut self, max_lanes: usize) -> Vec<String> {
        if self.lanes.len() <= max_lanes {
            return Vec::new();
        }
        let excess = self.lanes.len() - max_lanes;
        let mut candidates: Vec<(u64, String)> = self
            .lanes
            .values()
            .filter(|s| !is_system_lane(&s.lane) && s.is_idle())
            .map(|s| (s.last_activity_at_ms, s.lane.clone()))
            .collect();
        candidates.sort();
        let evicted: Vec<String> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, lane)| lane)
            .collect();
        for lane in &evicted {
            self.lanes.remove(lane);
        }
        evicted
    }

    pub fn stats(&self) -> LaneStats {
        let mut stats = LaneStats {
            total_lanes: self.lanes.len(),
            ..Default::default()
        };
        for state in self.lanes.values() {
            if state.is_idle() {
                stats.idle_lanes += 1;
            } else {
                stats.busy_lanes += 1;
            }
            if is_system_lane(&state.lane) {
                stats.system_lanes += 1;
            }
        }
        stats
    }
}
