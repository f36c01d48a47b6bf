//! Mobility profile - the decay curve that decides how sticky a tag location is
//!
//! The weight applied against a relocation follows `y = slope * elapsed + intercept`,
//! capped at `threshold`. The intercept is derived so that the weight equals the
//! threshold once `holdoff` milliseconds have elapsed.

use serde::{Deserialize, Serialize};

pub const ASSET_TRACKING_DEFAULT: &str = "asset_tracking_default";
pub const RETAIL_GARMENT_DEFAULT: &str = "retail_garment_default";

/// On-disk form. Field names match the profile files shipped with gateways.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileFile {
    id: String,
    /// Slope in dBm per millisecond
    #[serde(rename = "m")]
    slope: f64,
    /// dBm threshold ceiling
    #[serde(rename = "t")]
    threshold: f64,
    /// Holdoff in milliseconds
    #[serde(rename = "a")]
    holdoff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProfileFile", into = "ProfileFile")]
pub struct MobilityProfile {
    id: String,
    slope: f64,
    threshold: f64,
    holdoff: f64,
    intercept: f64,
}

impl From<ProfileFile> for MobilityProfile {
    fn from(file: ProfileFile) -> Self {
        Self::new(&file.id, file.slope, file.threshold, file.holdoff)
    }
}

impl From<MobilityProfile> for ProfileFile {
    fn from(profile: MobilityProfile) -> Self {
        Self {
            id: profile.id,
            slope: profile.slope,
            threshold: profile.threshold,
            holdoff: profile.holdoff,
        }
    }
}

impl Default for MobilityProfile {
    fn default() -> Self {
        Self::asset_tracking()
    }
}

impl MobilityProfile {
    pub fn new(id: &str, slope: f64, threshold: f64, holdoff: f64) -> Self {
        let mut profile =
            Self { id: id.to_string(), slope, threshold, holdoff, intercept: 0.0 };
        profile.recompute_intercept();
        profile
    }

    /// Fast-decaying profile for fixed assets
    pub fn asset_tracking() -> Self {
        Self::new(ASSET_TRACKING_DEFAULT, -0.008, 6.0, 0.0)
    }

    /// Slow-decaying profile with a one minute holdoff for retail floors
    pub fn retail_garment() -> Self {
        Self::new(RETAIL_GARMENT_DEFAULT, -0.0005, 6.0, 60000.0)
    }

    #[inline]
    fn recompute_intercept(&mut self) {
        self.intercept = self.threshold - (self.slope * self.holdoff);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn holdoff(&self) -> f64 {
        self.holdoff
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn set_slope(&mut self, slope: f64) {
        self.slope = slope;
        self.recompute_intercept();
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
        self.recompute_intercept();
    }

    pub fn set_holdoff(&mut self, holdoff: f64) {
        self.holdoff = holdoff;
        self.recompute_intercept();
    }

    /// Weight after `elapsed_ms` since the current location was last confirmed
    pub fn weight_at(&self, elapsed_ms: f64) -> f64 {
        let w = self.slope * elapsed_ms + self.intercept;
        w.min(self.threshold)
    }
}

impl std::fmt::Display for MobilityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: slope={}, threshold={}, holdoff={}, intercept={}",
            self.id, self.slope, self.threshold, self.holdoff, self.intercept
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intercept_derived_from_holdoff() {
        let profile = MobilityProfile::retail_garment();
        // 6.0 - (-0.0005 * 60000) = 36.0
        assert!((profile.intercept() - 36.0).abs() < 1e-9);
        // At holdoff elapsed the weight equals the threshold
        assert!((profile.weight_at(60000.0) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_setters_recompute_intercept() {
        let mut profile = MobilityProfile::asset_tracking();
        assert!((profile.intercept() - 6.0).abs() < 1e-9);

        profile.set_holdoff(1000.0);
        assert!((profile.intercept() - 14.0).abs() < 1e-9);

        profile.set_threshold(3.0);
        assert!((profile.intercept() - 11.0).abs() < 1e-9);

        profile.set_slope(-0.001);
        assert!((profile.intercept() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_weight_capped_and_decaying() {
        let profile = MobilityProfile::retail_garment();
        assert_eq!(profile.weight_at(0.0), 6.0);
        assert_eq!(profile.weight_at(30000.0), 6.0);
        // 120s: -0.0005 * 120000 + 36 = -24
        assert!((profile.weight_at(120000.0) + 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_file_format_round_trip_ignores_intercept() {
        let json = r#"{"id":"custom","m":-0.002,"t":4.0,"a":500.0}"#;
        let profile: MobilityProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id(), "custom");
        assert!((profile.intercept() - 5.0).abs() < 1e-9);

        let out = serde_json::to_value(&profile).unwrap();
        assert_eq!(out["m"], -0.002);
        assert!(out.get("intercept").is_none());
    }
}
