//! Bounded waypoint trail kept per tag for diagnostics

use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Waypoint {
    pub location: String,
    pub timestamp: u64,
}

/// Most recent waypoints, oldest evicted first
#[derive(Debug, Clone)]
pub struct WaypointHistory {
    waypoints: VecDeque<Waypoint>,
    max_size: usize,
}

impl Default for WaypointHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl WaypointHistory {
    pub fn new(max_size: usize) -> Self {
        Self { waypoints: VecDeque::with_capacity(max_size), max_size }
    }

    pub fn add(&mut self, location: &str, timestamp: u64) {
        if self.max_size == 0 {
            return;
        }
        while self.waypoints.len() >= self.max_size {
            self.waypoints.pop_front();
        }
        self.waypoints.push_back(Waypoint { location: location.to_string(), timestamp });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Waypoint> {
        self.waypoints.iter()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn latest(&self) -> Option<&Waypoint> {
        self.waypoints.back()
    }
}
