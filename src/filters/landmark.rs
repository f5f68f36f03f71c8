//! Landmark EKF tracks and unconfirmed hypotheses
//!
//! Landmark state (5D): [x, y, r, g, b]
//! Measurement (4D):    [bearing, r, g, b]
//!
//! h(m) = [atan2(m_y - y, m_x - x) - θ, m_r, m_g, m_b]
//!
//! The color channels are observed directly, so only the bearing row of the
//! Jacobian depends on the pose.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{SlamError, SlamResult};
use crate::types::{
    normalize_angle, symmetrize, Color, KalmanGain, LandmarkCov, LandmarkVec, MeasurementCov,
    MeasurementJacobian, MeasurementVec, Observation, Pose,
};

/// Below this squared distance the bearing to a landmark is undefined [m²]
const MIN_RANGE_SQ: f64 = 1e-9;

/// Smallest/largest eigenvalue ratio of the ray normal matrix accepted for
/// triangulation (about 3.6° between the extreme rays)
const MIN_RAY_CONDITION: f64 = 1e-3;

/// Measurement model linearized at a landmark estimate
#[derive(Clone, Debug)]
pub struct Linearization {
    /// Expected measurement h(m)
    pub expected: MeasurementVec,
    /// H = ∂h/∂m (4×5)
    pub jacobian: MeasurementJacobian,
    /// z - h(m), bearing wrapped into (−π, π]
    pub innovation: MeasurementVec,
}

/// Linearize the bearing/color model for one observation.
///
/// When the landmark coincides with the observer every bearing is
/// consistent: the expected bearing is the observed one and the bearing row
/// of H is zero, so only the color channels carry information.
pub fn linearize(pose: &Pose, mean: &LandmarkVec, observation: &Observation) -> Linearization {
    let dx = mean[0] - pose.x;
    let dy = mean[1] - pose.y;
    let q = dx * dx + dy * dy;

    let mut jacobian = MeasurementJacobian::zeros();
    jacobian[(1, 2)] = 1.0;
    jacobian[(2, 3)] = 1.0;
    jacobian[(3, 4)] = 1.0;

    let expected_bearing = if q < MIN_RANGE_SQ {
        observation.bearing
    } else {
        jacobian[(0, 0)] = -dy / q;
        jacobian[(0, 1)] = dx / q;
        normalize_angle(dy.atan2(dx) - pose.heading)
    };

    let expected = MeasurementVec::new(expected_bearing, mean[2], mean[3], mean[4]);
    let mut innovation = observation.as_vector() - expected;
    innovation[0] = normalize_angle(innovation[0]);

    Linearization {
        expected,
        jacobian,
        innovation,
    }
}

/// Place a sighting in landmark space at an assumed range.
pub fn back_project(pose: &Pose, observation: &Observation, range: f64) -> LandmarkVec {
    let angle = pose.heading + observation.bearing;
    LandmarkVec::new(
        pose.x + range * angle.cos(),
        pose.y + range * angle.sin(),
        observation.color.r,
        observation.color.g,
        observation.color.b,
    )
}

/// Innovation statistics for one landmark/observation pair
#[derive(Clone, Debug)]
pub struct InnovationStats {
    pub linearization: Linearization,
    /// Q = H·Σ·Hᵀ + R
    pub covariance: MeasurementCov,
    pub covariance_inv: MeasurementCov,
    pub determinant: f64,
}

impl InnovationStats {
    /// Importance factor (2π·|Q|)^(−1/2)·exp(−½·νᵀ·Q⁻¹·ν)
    pub fn likelihood(&self) -> f64 {
        let nu = &self.linearization.innovation;
        let mahalanobis = (nu.transpose() * self.covariance_inv * nu)[0];
        (2.0 * PI * self.determinant).powf(-0.5) * (-0.5 * mahalanobis).exp()
    }
}

/// Confirmed landmark tracked by an EKF
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub mean: LandmarkVec,
    pub covariance: LandmarkCov,
    /// Number of EKF updates applied
    pub support_count: u32,
    /// Calibration anchors are never updated
    pub immutable: bool,
}

impl Landmark {
    pub fn new(mean: LandmarkVec, covariance: LandmarkCov) -> Self {
        Self {
            mean,
            covariance: symmetrize(&covariance),
            support_count: 0,
            immutable: false,
        }
    }

    /// Fixed landmark at a known position and color
    pub fn anchor(x: f64, y: f64, color: Color, variance: f64) -> Self {
        Self {
            mean: LandmarkVec::new(x, y, color.r, color.g, color.b),
            covariance: LandmarkCov::identity() * variance,
            support_count: 0,
            immutable: true,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.mean[0], self.mean[1])
    }

    pub fn color(&self) -> Color {
        Color::new(self.mean[2], self.mean[3], self.mean[4])
    }

    /// Innovation and its covariance without touching the estimate
    pub fn innovation(
        &self,
        pose: &Pose,
        observation: &Observation,
        measurement_noise: &MeasurementCov,
    ) -> SlamResult<InnovationStats> {
        let linearization = linearize(pose, &self.mean, observation);
        let h = &linearization.jacobian;
        let covariance = h * self.covariance * h.transpose() + measurement_noise;

        // Rank-deficient Q can leave LU rounding residue instead of an exact zero
        let determinant = covariance.determinant();
        let diagonal_scale = covariance.diagonal().iter().product::<f64>().abs();
        if !determinant.is_finite() || determinant <= f64::EPSILON * diagonal_scale {
            return Err(SlamError::SingularInnovation);
        }
        let covariance_inv = covariance
            .try_inverse()
            .ok_or(SlamError::SingularInnovation)?;

        Ok(InnovationStats {
            linearization,
            covariance,
            covariance_inv,
            determinant,
        })
    }

    /// EKF correction with one observation; returns the innovation statistics
    /// used, so the caller can weight the particle.
    ///
    /// The covariance uses the Joseph form (I−KH)Σ(I−KH)ᵀ + KRKᵀ, then is
    /// symmetrized. A singular Q leaves the landmark untouched.
    pub fn update(
        &mut self,
        pose: &Pose,
        observation: &Observation,
        measurement_noise: &MeasurementCov,
    ) -> SlamResult<InnovationStats> {
        let stats = self.innovation(pose, observation, measurement_noise)?;
        if self.immutable {
            return Ok(stats);
        }

        let h = &stats.linearization.jacobian;
        let k: KalmanGain = self.covariance * h.transpose() * stats.covariance_inv;

        self.mean += k * stats.linearization.innovation;

        let i_kh = LandmarkCov::identity() - k * h;
        let joseph = i_kh * self.covariance * i_kh.transpose()
            + k * measurement_noise * k.transpose();
        self.covariance = symmetrize(&joseph);

        self.support_count += 1;
        Ok(stats)
    }
}

/// One corroborating sighting of a hypothesis
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub pose: Pose,
    pub observation: Observation,
}

/// Landmark candidate awaiting corroboration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub mean: LandmarkVec,
    pub covariance: LandmarkCov,
    /// Number of consistent sightings so far (including the first)
    pub observation_count: u32,
    /// Whether the current position came from intersecting bearing rays
    pub triangulated: bool,
    pub sightings: Vec<Sighting>,
    /// Measurement cycles since the last consistent sighting
    #[serde(default)]
    pub missed_cycles: u32,
}

impl Hypothesis {
    /// Candidate from a single sighting, back-projected at `default_range`
    pub fn new(pose: &Pose, observation: &Observation, default_range: f64, prior: LandmarkCov) -> Self {
        Self {
            mean: back_project(pose, observation, default_range),
            covariance: symmetrize(&prior),
            observation_count: 1,
            triangulated: false,
            sightings: vec![Sighting {
                pose: *pose,
                observation: *observation,
            }],
            missed_cycles: 0,
        }
    }

    /// Record another consistent sighting and re-estimate the mean
    pub fn corroborate(&mut self, pose: &Pose, observation: &Observation, default_range: f64) {
        self.sightings.push(Sighting {
            pose: *pose,
            observation: *observation,
        });
        self.observation_count += 1;
        self.missed_cycles = 0;
        self.reestimate(default_range);
    }

    fn reestimate(&mut self, default_range: f64) {
        let n = self.sightings.len() as f64;
        let (r, g, b) = self.sightings.iter().fold((0.0, 0.0, 0.0), |acc, s| {
            (
                acc.0 + s.observation.color.r,
                acc.1 + s.observation.color.g,
                acc.2 + s.observation.color.b,
            )
        });

        let (x, y) = match triangulate(&self.sightings) {
            Some(point) => {
                self.triangulated = true;
                point
            }
            None => {
                self.triangulated = false;
                let (sx, sy) = self.sightings.iter().fold((0.0, 0.0), |acc, s| {
                    let p = back_project(&s.pose, &s.observation, default_range);
                    (acc.0 + p[0], acc.1 + p[1])
                });
                (sx / n, sy / n)
            }
        };

        self.mean = LandmarkVec::new(x, y, r / n, g / n, b / n);
    }

    /// Convert into a tracked landmark.
    ///
    /// Covariance is the spread of the per-sighting back-projections plus the
    /// variance floor. Without a triangulated position the range is
    /// unobserved, so the prior position block is kept as well.
    pub fn into_landmark(self, default_range: f64, min_variance: &LandmarkCov) -> Landmark {
        let n = self.sightings.len().max(1) as f64;
        let mut spread = LandmarkCov::zeros();
        for s in &self.sightings {
            let range = if self.triangulated {
                ((self.mean[0] - s.pose.x).powi(2) + (self.mean[1] - s.pose.y).powi(2)).sqrt()
            } else {
                default_range
            };
            let d = back_project(&s.pose, &s.observation, range) - self.mean;
            spread += d * d.transpose();
        }
        spread /= n;

        let mut covariance = spread + min_variance;
        if !self.triangulated {
            let mut position_prior = LandmarkCov::zeros();
            position_prior
                .fixed_view_mut::<2, 2>(0, 0)
                .copy_from(&self.covariance.fixed_view::<2, 2>(0, 0));
            covariance += position_prior;
        }

        Landmark::new(self.mean, covariance)
    }
}

/// Least-squares intersection of the sighting bearing rays.
///
/// Returns None when the rays are too close to parallel or the solution
/// lies behind any observer.
pub fn triangulate(sightings: &[Sighting]) -> Option<(f64, f64)> {
    if sightings.len() < 2 {
        return None;
    }

    // Σ nᵢnᵢᵀ x = Σ nᵢnᵢᵀ pᵢ with nᵢ normal to ray i
    let (mut a00, mut a01, mut a11, mut b0, mut b1) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for s in sightings {
        let angle = s.pose.heading + s.observation.bearing;
        let (nx, ny) = (-angle.sin(), angle.cos());
        let proj = nx * s.pose.x + ny * s.pose.y;
        a00 += nx * nx;
        a01 += nx * ny;
        a11 += ny * ny;
        b0 += nx * proj;
        b1 += ny * proj;
    }

    let trace = a00 + a11;
    let det = a00 * a11 - a01 * a01;
    let disc = ((trace / 2.0).powi(2) - det).max(0.0).sqrt();
    let lambda_max = trace / 2.0 + disc;
    let lambda_min = trace / 2.0 - disc;
    if lambda_max <= 0.0 || lambda_min / lambda_max < MIN_RAY_CONDITION {
        return None;
    }

    let x = (a11 * b0 - a01 * b1) / det;
    let y = (a00 * b1 - a01 * b0) / det;

    let in_front = sightings.iter().all(|s| {
        let angle = s.pose.heading + s.observation.bearing;
        (x - s.pose.x) * angle.cos() + (y - s.pose.y) * angle.sin() > 0.0
    });
    in_front.then_some((x, y))
}
