//! FastSLAM for a mobile agent observing colored point landmarks.
//!
//! Each particle carries a full pose hypothesis and its own EKF-tracked map
//! of landmarks `[x, y, r, g, b]`, observed as `(bearing, r, g, b)`.
//! [`FastSlam`] is the entry point: feed it commands and observation batches,
//! read back a [`PoseEstimate`].

pub mod config;
pub mod error;
pub mod filters;
pub mod live_status;
pub mod types;

pub use config::{AssociationConfig, EstimateMode, MotionNoise, SeedLandmark, SlamConfig};
pub use error::{SlamError, SlamResult};
pub use filters::{FastSlam, FastSlamState};
pub use types::{normalize_angle, Color, ControlCommand, Message, Observation, Pose, PoseEstimate};
