//! Inventory gateway library
//!
//! Turns RFID read batches into tag locations, lifecycle states and
//! upstream inventory events. Exposes modules for integration testing and
//! binary reuse.

pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;
