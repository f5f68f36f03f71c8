//! Static engine configuration
//!
//! Loaded once at startup, either built in code or read from a JSON file.
//! Every section has defaults so partial files are accepted.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SlamError, SlamResult};
use crate::types::{
    landmark_cov_from_rows, measurement_cov_from_rows, Color, LandmarkCov, LandmarkVec, MeasurementCov, Pose,
    LANDMARK_DIM, MEASURE_DIM,
};

/// Gains mapping command magnitudes to motion noise std-devs.
///
/// σ_drive = (drive_from_linear·|v| + drive_from_angular·|ω|)·dt
/// σ_turn  = (turn_from_angular·|ω| + turn_from_linear·|v|)·dt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionNoise {
    pub drive_from_linear: f64,
    pub drive_from_angular: f64,
    pub turn_from_angular: f64,
    pub turn_from_linear: f64,
}

impl Default for MotionNoise {
    fn default() -> Self {
        Self {
            drive_from_linear: 0.05,
            drive_from_angular: 0.01,
            turn_from_angular: 0.05,
            turn_from_linear: 0.01,
        }
    }
}

impl MotionNoise {
    /// Noise-free motion (deterministic dead reckoning)
    pub fn zero() -> Self {
        Self {
            drive_from_linear: 0.0,
            drive_from_angular: 0.0,
            turn_from_angular: 0.0,
            turn_from_linear: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Minimum combined likelihood, in (0, 1], for a match
    pub acceptance_threshold: f64,
    /// Sightings a hypothesis needs before it becomes a landmark
    pub promotion_threshold: u32,
    /// Assumed distance to a landmark seen only once [m]
    pub default_range: f64,
    /// Covariance given to a freshly created hypothesis
    pub hypothesis_prior: [[f64; LANDMARK_DIM]; LANDMARK_DIM],
    /// Diagonal added to the sighting spread when promoting
    pub min_landmark_variance: [f64; LANDMARK_DIM],
    /// Weight factor for observations without an innovation statistic
    pub no_match_weight: f64,
    /// Weight factor when the innovation covariance cannot be inverted
    pub floor_weight: f64,
    /// Consecutive measurement cycles a hypothesis may go unseen before it is
    /// dropped; `None` keeps hypotheses until promotion
    pub hypothesis_max_missed: Option<u32>,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.01,
            promotion_threshold: 3,
            default_range: 5.0,
            hypothesis_prior: diagonal_rows([25.0, 25.0, 400.0, 400.0, 400.0]),
            min_landmark_variance: [0.05, 0.05, 4.0, 4.0, 4.0],
            no_match_weight: 0.5,
            floor_weight: 1e-12,
            hypothesis_max_missed: Some(20),
        }
    }
}

impl AssociationConfig {
    pub fn hypothesis_prior(&self) -> LandmarkCov {
        landmark_cov_from_rows(&self.hypothesis_prior)
    }

    pub fn min_landmark_variance(&self) -> LandmarkCov {
        LandmarkCov::from_diagonal(&LandmarkVec::from(self.min_landmark_variance))
    }
}

/// Which particle statistic is published as the pose estimate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMode {
    #[default]
    WeightedMean,
    HighestWeight,
}

/// Landmark known before the run starts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedLandmark {
    pub x: f64,
    pub y: f64,
    pub color: Color,
    /// Variance used on every diagonal entry of the seed covariance
    #[serde(default = "default_seed_variance")]
    pub variance: f64,
    /// Immutable landmarks are matched and weighted but never updated
    #[serde(default)]
    pub immutable: bool,
}

fn default_seed_variance() -> f64 {
    0.01
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    /// Number of particles M
    pub particle_count: usize,
    /// RNG seed; entropy when absent
    pub seed: Option<u64>,
    pub motion: MotionNoise,
    /// R over (bearing, r, g, b)
    pub measurement_noise: [[f64; MEASURE_DIM]; MEASURE_DIM],
    pub association: AssociationConfig,
    pub initial_pose: Pose,
    /// Std-dev of the jitter applied to each particle's start (x, y, heading)
    pub initial_spread: [f64; 3],
    pub estimate: EstimateMode,
    pub seed_landmarks: Vec<SeedLandmark>,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            particle_count: 100,
            seed: None,
            motion: MotionNoise::default(),
            measurement_noise: diagonal_rows([0.01, 25.0, 25.0, 25.0]),
            association: AssociationConfig::default(),
            initial_pose: Pose::default(),
            initial_spread: [0.0, 0.0, 0.0],
            estimate: EstimateMode::default(),
            seed_landmarks: Vec::new(),
        }
    }
}

impl SlamConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> SlamResult<Self> {
        let file = File::open(path.as_ref())?;
        let config: SlamConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> SlamResult<Self> {
        let config: SlamConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn measurement_noise(&self) -> MeasurementCov {
        measurement_cov_from_rows(&self.measurement_noise)
    }

    pub fn validate(&self) -> SlamResult<()> {
        if self.particle_count == 0 {
            return Err(SlamError::EmptyParticleSet);
        }

        let motion = [
            self.motion.drive_from_linear,
            self.motion.drive_from_angular,
            self.motion.turn_from_angular,
            self.motion.turn_from_linear,
        ];
        if motion.iter().any(|g| !g.is_finite() || *g < 0.0) {
            return Err(invalid("motion noise gains must be finite and >= 0"));
        }

        let r = self.measurement_noise();
        if r.iter().any(|v| !v.is_finite()) {
            return Err(invalid("measurement_noise must be finite"));
        }
        if (r - r.transpose()).amax() > 1e-9 {
            return Err(invalid("measurement_noise must be symmetric"));
        }
        if r.diagonal().iter().any(|v| *v <= 0.0) {
            return Err(invalid("measurement_noise diagonal must be > 0"));
        }

        let a = &self.association;
        if !(a.acceptance_threshold > 0.0 && a.acceptance_threshold <= 1.0) {
            return Err(invalid("acceptance_threshold must be in (0, 1]"));
        }
        if a.promotion_threshold == 0 {
            return Err(invalid("promotion_threshold must be >= 1"));
        }
        if !(a.default_range.is_finite() && a.default_range > 0.0) {
            return Err(invalid("default_range must be > 0"));
        }
        let prior = a.hypothesis_prior();
        if prior.iter().any(|v| !v.is_finite()) || (prior - prior.transpose()).amax() > 1e-9 {
            return Err(invalid("hypothesis_prior must be finite and symmetric"));
        }
        if a.min_landmark_variance.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid("min_landmark_variance must be finite and >= 0"));
        }
        for (name, w) in [("no_match_weight", a.no_match_weight), ("floor_weight", a.floor_weight)] {
            if !(w.is_finite() && w >= 0.0) {
                return Err(invalid(&format!("{name} must be finite and >= 0")));
            }
        }

        if self.initial_spread.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(invalid("initial_spread must be finite and >= 0"));
        }
        for (i, seed) in self.seed_landmarks.iter().enumerate() {
            let values = [seed.x, seed.y, seed.color.r, seed.color.g, seed.color.b];
            if values.iter().any(|v| !v.is_finite()) || !(seed.variance > 0.0) {
                return Err(invalid(&format!("seed landmark {i} is malformed")));
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SlamError {
    SlamError::InvalidConfig(msg.to_string())
}

fn diagonal_rows<const N: usize>(diag: [f64; N]) -> [[f64; N]; N] {
    let mut rows = [[0.0; N]; N];
    for (i, value) in diag.iter().enumerate() {
        rows[i][i] = *value;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SlamConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_particles_rejected() {
        let config = SlamConfig {
            particle_count: 0,
            ..SlamConfig::default()
        };
        assert!(matches!(config.validate(), Err(SlamError::EmptyParticleSet)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SlamConfig::from_json_str(
            r#"{
                "particle_count": 7,
                "seed": 42,
                "association": { "promotion_threshold": 5 },
                "estimate": "highest_weight",
                "seed_landmarks": [
                    { "x": 10.0, "y": 0.0, "color": { "r": 75, "g": 55, "b": 230 }, "immutable": true }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.particle_count, 7);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.association.promotion_threshold, 5);
        assert_eq!(config.association.default_range, 5.0);
        assert_eq!(config.estimate, EstimateMode::HighestWeight);
        assert_eq!(config.seed_landmarks[0].variance, 0.01);
        assert!(config.seed_landmarks[0].immutable);
    }

    #[test]
    fn test_hypothesis_expiry_can_be_disabled() {
        let config = SlamConfig::from_json_str(r#"{ "association": { "hypothesis_max_missed": null } }"#).unwrap();
        assert_eq!(config.association.hypothesis_max_missed, None);
        assert_eq!(SlamConfig::default().association.hypothesis_max_missed, Some(20));
    }

    #[test]
    fn test_asymmetric_noise_rejected() {
        let mut config = SlamConfig::default();
        config.measurement_noise[0][1] = 1.0;
        assert!(matches!(config.validate(), Err(SlamError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let mut config = SlamConfig::default();
        config.association.acceptance_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = SlamConfig::default();
        config.association.promotion_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = SlamConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SlamError::Parse(_)));
    }
}
