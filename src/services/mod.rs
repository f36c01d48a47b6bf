//! Services - business logic and state management
//!
//! - `inventory` - Tag registry, lifecycle decisions and background maintenance
//! - `resolver` - Active mobility profile and location weighting
//! - `profiles` - Mobility profile storage and activation

pub mod inventory;
pub mod profiles;
pub mod resolver;

// Re-export commonly used types
pub use inventory::{EpcPattern, EventListener, InventoryEngine, InventorySummary, ListenerId, Snapshot};
pub use profiles::{ProfileResult, ProfileStore};
pub use resolver::LocationResolver;
