//! Location resolver - applies the active mobility profile to relocation decisions
//!
//! Exactly one profile is active. It is read on every batch and replaced
//! rarely (administrative activation), so it lives behind an RwLock and each
//! batch works from its own copy.

use crate::domain::mobility::MobilityProfile;
use crate::domain::tag::LocationWeigher;
use crate::domain::types::ReaderContext;
use crate::error::Result;
use crate::io::files::write_atomically;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ACTIVE_PROFILE_FILE: &str = "mobility_profile.json";

/// Decay weighting for one batch, fixed to the batch's wall clock
#[derive(Debug, Clone)]
pub struct DecayWeight {
    profile: MobilityProfile,
    now: u64,
}

impl DecayWeight {
    pub fn new(profile: MobilityProfile, now: u64) -> Self {
        Self { profile, now }
    }
}

impl LocationWeigher for DecayWeight {
    fn weight(&self, last_read_ms: u64, reader: &ReaderContext) -> f64 {
        if reader.is_deep_scan() {
            return self.profile.threshold();
        }
        let elapsed = self.now as f64 - last_read_ms as f64;
        self.profile.weight_at(elapsed)
    }
}

pub struct LocationResolver {
    active: RwLock<MobilityProfile>,
    cache_file: PathBuf,
}

impl LocationResolver {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            active: RwLock::new(MobilityProfile::default()),
            cache_file: cache_dir.join(ACTIVE_PROFILE_FILE),
        }
    }

    /// Load the persisted active profile, keeping the default if there is none
    pub fn restore(&self) {
        let content = match fs::read_to_string(&self.cache_file) {
            Ok(content) => content,
            Err(_) => {
                info!(profile = %self.active.read().id(), "mobility_profile_default");
                return;
            }
        };
        match serde_json::from_str::<MobilityProfile>(&content) {
            Ok(profile) => {
                info!(profile = %profile, "mobility_profile_restored");
                *self.active.write() = profile;
            }
            Err(e) => {
                warn!(file = %self.cache_file.display(), error = %e, "mobility_profile_restore_failed");
            }
        }
    }

    pub fn active(&self) -> MobilityProfile {
        self.active.read().clone()
    }

    /// Replace the active profile and persist it
    pub fn set_active(&self, profile: MobilityProfile) -> Result<()> {
        let json = serde_json::to_vec_pretty(&profile)?;
        write_atomically(&self.cache_file, &json)?;
        info!(profile = %profile, "mobility_profile_activated");
        *self.active.write() = profile;
        Ok(())
    }

    pub fn weigher(&self, now: u64) -> DecayWeight {
        DecayWeight::new(self.active(), now)
    }

    /// Weight against leaving a location last confirmed at `last_read_ms`
    pub fn weight(&self, last_read_ms: u64, reader: &ReaderContext, now: u64) -> f64 {
        self.weigher(now).weight(last_read_ms, reader)
    }
}
