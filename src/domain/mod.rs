//! Domain models - tag records, read statistics and the events they produce
//!
//! - `Tag` - authoritative per-tag location and lifecycle state
//! - `ReadStats` - streaming signal statistics per (tag, antenna)
//! - `MobilityProfile` - decay curve that weighs relocations
//! - `EventItem` / `EventBatch` - upstream inventory events
//! - `ReaderContext` / `TagRead` - the inputs of one observation

pub mod event;
pub mod history;
pub mod mobility;
pub mod stats;
pub mod tag;
pub mod types;

pub use event::{EventBatch, EventItem, TagEvent};
pub use mobility::MobilityProfile;
pub use tag::{Lifecycle, Tag, TagRecord, TagState};
pub use types::{ReaderContext, ReaderRoles, TagRead};
