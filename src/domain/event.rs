//! Upstream inventory events derived from tag state transitions

use serde::Serialize;

/// Business-level transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagEvent {
    Arrival,
    Moved,
    Departed,
    Returned,
}

impl TagEvent {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TagEvent::Arrival => "arrival",
            TagEvent::Moved => "moved",
            TagEvent::Departed => "departed",
            TagEvent::Returned => "returned",
        }
    }
}

impl std::fmt::Display for TagEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event for one tag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventItem {
    pub facility_id: String,
    pub epc_code: String,
    pub tid: Option<String>,
    pub epc_encode_format: &'static str,
    pub event_type: TagEvent,
    /// Epoch ms of the read (or sweep) that caused the event
    pub timestamp: u64,
    pub location: String,
}

impl EventItem {
    pub fn new(
        epc: &str,
        tid: Option<&str>,
        location: &str,
        facility_id: &str,
        event_type: TagEvent,
        timestamp: u64,
    ) -> Self {
        Self {
            facility_id: facility_id.to_string(),
            epc_code: epc.to_string(),
            tid: tid.map(str::to_string),
            epc_encode_format: "tbd",
            event_type,
            timestamp,
            location: location.to_string(),
        }
    }
}

/// Events accumulated during one critical section, published after release
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventBatch {
    pub sent_on: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_id: Option<String>,
    pub data: Vec<EventItem>,
}

impl EventBatch {
    pub fn new(sent_on: u64) -> Self {
        Self { sent_on, gateway_id: None, data: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, item: EventItem) {
        self.data.push(item);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn count(&self, event: TagEvent) -> usize {
        self.data.iter().filter(|item| item.event_type == event).count()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
