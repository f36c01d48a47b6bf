//! Mobility profile store - named profiles kept as `<id>.json` files
//!
//! Built-in profiles are always available even when no file exists for them.
//! Activation is reachable from remote administration, so it reports failure
//! as a `ProfileResult` instead of an error.

use crate::domain::mobility::MobilityProfile;
use crate::error::{InventoryError, Result};
use crate::io::files::{ensure_dir, remove_if_exists, write_atomically};
use crate::services::resolver::LocationResolver;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of an administrative profile request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileResult {
    pub success: bool,
    pub message: String,
}

impl ProfileResult {
    fn ok(message: String) -> Self {
        Self { success: true, message }
    }

    fn failed(message: String) -> Self {
        Self { success: false, message }
    }
}

fn builtin(id: &str) -> Option<MobilityProfile> {
    [MobilityProfile::asset_tracking(), MobilityProfile::retail_garment()]
        .into_iter()
        .find(|p| p.id() == id)
}

pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(InventoryError::InvalidArgument(format!("bad profile id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Ids of every available profile, built-ins included, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = [MobilityProfile::asset_tracking(), MobilityProfile::retail_garment()]
            .iter()
            .map(|p| p.id().to_string())
            .collect();

        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        ids.insert(stem.to_string());
                    }
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// A file overrides a built-in of the same id
    pub fn get(&self, id: &str) -> Result<Option<MobilityProfile>> {
        let path = self.path_for(id)?;
        match fs::read_to_string(&path) {
            Ok(content) => {
                let mut profile: MobilityProfile = serde_json::from_str(&content)?;
                // The file name is authoritative
                profile.set_id(id);
                Ok(Some(profile))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(builtin(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put(&self, profile: &MobilityProfile) -> Result<PathBuf> {
        let path = self.path_for(profile.id())?;
        ensure_dir(&self.dir)?;
        write_atomically(&path, &serde_json::to_vec_pretty(profile)?)?;
        info!(profile = %profile, "mobility_profile_stored");
        Ok(path)
    }

    /// Returns true if a file was removed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = remove_if_exists(&self.path_for(id)?)?;
        if removed {
            info!(profile = %id, "mobility_profile_deleted");
        }
        Ok(removed)
    }

    /// Make `id` the active profile of `resolver`
    pub fn activate(&self, id: &str, resolver: &LocationResolver) -> ProfileResult {
        let profile = match self.get(id) {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!(profile = %id, "mobility_profile_unknown");
                return ProfileResult::failed(format!("unknown mobility profile '{id}'"));
            }
            Err(e) => {
                warn!(profile = %id, error = %e, "mobility_profile_load_failed");
                return ProfileResult::failed(format!("unable to load mobility profile '{id}': {e}"));
            }
        };

        match resolver.set_active(profile) {
            Ok(()) => ProfileResult::ok(format!("mobility profile '{id}' activated")),
            Err(e) => ProfileResult::failed(format!("unable to persist mobility profile '{id}': {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtins_always_listed() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(&dir.path().join("missing"));
        assert_eq!(store.list().unwrap(), vec!["asset_tracking_default", "retail_garment_default"]);
        assert_eq!(store.get("retail_garment_default").unwrap(), Some(MobilityProfile::retail_garment()));
        assert_eq!(store.get("nope").unwrap(), None);
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let profile = MobilityProfile::new("dock_door", -0.001, 4.0, 2000.0);

        let path = store.put(&profile).unwrap();
        assert!(path.ends_with("dock_door.json"));
        assert!(store.list().unwrap().contains(&"dock_door".to_string()));
        assert_eq!(store.get("dock_door").unwrap(), Some(profile));

        assert!(store.delete("dock_door").unwrap());
        assert!(!store.delete("dock_door").unwrap());
        assert_eq!(store.get("dock_door").unwrap(), None);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(matches!(store.get("../etc"), Err(InventoryError::InvalidArgument(_))));
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_activate_known_and_unknown() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(&dir.path().join("mobility"));
        let resolver = LocationResolver::new(&dir.path().join("cache"));

        let result = store.activate("retail_garment_default", &resolver);
        assert!(result.success, "{}", result.message);
        assert_eq!(resolver.active().id(), "retail_garment_default");

        let result = store.activate("does_not_exist", &resolver);
        assert!(!result.success);
        assert!(result.message.contains("does_not_exist"));
        // Failed activation leaves the active profile alone
        assert_eq!(resolver.active().id(), "retail_garment_default");
    }
}
