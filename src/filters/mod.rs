/// FastSLAM filter modules
///
/// Per-particle EKF landmark maps, bearing + color data association and
/// low-variance resampling, driven by the engine in `fastslam`.

pub mod association;
pub mod fastslam;
pub mod landmark;
pub mod motion_model;
pub mod particle;
pub mod resampling;

pub use association::{associate, Association};
pub use fastslam::{FastSlam, FastSlamState};
pub use landmark::{Hypothesis, Landmark};
pub use particle::{FeatureId, HypothesisId, LandmarkId, Particle};
