//! Observation-to-map data association
//!
//! Tiers, searched in order:
//! 1. confirmed landmarks (EKF tracked)
//! 2. hypotheses (corroborated, promoted once they reach the threshold)
//! 3. a new hypothesis from the single sighting
//!
//! The combined likelihood multiplies an unnormalized Gaussian over the
//! bearing innovation with one over the color innovation, so either axis
//! being far off drives the product to ~0.

use crate::config::AssociationConfig;
use crate::error::SlamResult;
use crate::filters::landmark::{linearize, Hypothesis};
use crate::filters::particle::{FeatureId, HypothesisId, LandmarkId, Particle};
use crate::types::{LandmarkCov, LandmarkVec, MeasurementCov, Observation, Pose};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Association {
    /// Matched a confirmed landmark; the caller runs the EKF update
    Matched(LandmarkId),
    /// Matched a hypothesis still below the promotion threshold
    Corroborated(HypothesisId),
    /// Hypothesis reached the threshold and became a landmark
    Promoted {
        hypothesis: HypothesisId,
        landmark: LandmarkId,
    },
    /// Nothing matched; a hypothesis was created
    New(HypothesisId),
}

/// Combined position × color likelihood in [0, 1]
pub fn match_likelihood(
    pose: &Pose,
    mean: &LandmarkVec,
    covariance: &LandmarkCov,
    observation: &Observation,
    measurement_noise: &MeasurementCov,
) -> f64 {
    let lin = linearize(pose, mean, observation);
    let h = &lin.jacobian;
    let q = h * covariance * h.transpose() + measurement_noise;

    let bearing_var = q[(0, 0)];
    if !(bearing_var > 0.0) {
        return 0.0;
    }
    let position = (-0.5 * lin.innovation[0].powi(2) / bearing_var).exp();

    let color_q = q.fixed_view::<3, 3>(1, 1).into_owned();
    let color_nu = lin.innovation.fixed_rows::<3>(1).into_owned();
    let color = match color_q.try_inverse() {
        Some(inv) => (-0.5 * (color_nu.transpose() * inv * color_nu)[0]).exp(),
        None => 0.0,
    };

    let combined = position * color;
    if combined.is_finite() {
        combined
    } else {
        0.0
    }
}

/// Highest-likelihood candidate that clears the threshold
fn best_candidate<I>(candidates: I, threshold: f64) -> Option<(FeatureId, f64)>
where
    I: Iterator<Item = (FeatureId, f64)>,
{
    candidates
        .filter(|(_, likelihood)| *likelihood >= threshold)
        .fold(None, |best: Option<(FeatureId, f64)>, (id, likelihood)| match best {
            Some((_, top)) if top >= likelihood => best,
            _ => Some((id, likelihood)),
        })
}

/// Associate one observation against a particle's map.
///
/// Hypothesis bookkeeping (corroboration, promotion, creation) happens here;
/// the EKF update of a matched landmark is left to the caller.
pub fn associate(
    particle: &mut Particle,
    observation: &Observation,
    config: &AssociationConfig,
    measurement_noise: &MeasurementCov,
) -> SlamResult<Association> {
    let pose = particle.pose;

    let landmark_match = best_candidate(
        particle.landmarks().map(|(id, lm)| {
            let l = match_likelihood(&pose, &lm.mean, &lm.covariance, observation, measurement_noise);
            (*id, l)
        }),
        config.acceptance_threshold,
    );
    if let Some((id, _)) = landmark_match {
        return Ok(Association::Matched(id));
    }

    let hypothesis_match = best_candidate(
        particle.hypotheses().map(|(id, hyp)| {
            let l = match_likelihood(&pose, &hyp.mean, &hyp.covariance, observation, measurement_noise);
            (*id, l)
        }),
        config.acceptance_threshold,
    );

    let (hypothesis, count) = match hypothesis_match {
        Some((id, _)) => {
            let hyp = particle.hypothesis_mut(id)?;
            hyp.corroborate(&pose, observation, config.default_range);
            (id, hyp.observation_count)
        }
        None => {
            let hyp = Hypothesis::new(
                &pose,
                observation,
                config.default_range,
                config.hypothesis_prior(),
            );
            let id = particle.add_hypothesis(hyp);
            if config.promotion_threshold > 1 {
                return Ok(Association::New(id));
            }
            (id, 1)
        }
    };

    if count < config.promotion_threshold {
        return Ok(Association::Corroborated(hypothesis));
    }

    let min_variance = config.min_landmark_variance();
    let default_range = config.default_range;
    let landmark = particle.promote(hypothesis, |hyp| hyp.into_landmark(default_range, &min_variance))?;
    log::debug!(
        "Promoted hypothesis {} to landmark {} after {} sightings",
        hypothesis,
        landmark,
        count
    );
    Ok(Association::Promoted {
        hypothesis,
        landmark,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::landmark::Landmark;
    use crate::types::{Color, MeasurementVec};
    use std::f64::consts::PI;

    fn noise() -> MeasurementCov {
        MeasurementCov::from_diagonal(&MeasurementVec::new(0.01, 25.0, 25.0, 25.0))
    }

    fn blue() -> Color {
        Color::new(75.0, 55.0, 230.0)
    }

    fn particle_with_landmark(x: f64, y: f64) -> (Particle, LandmarkId) {
        let mut p = Particle::new(Pose::default());
        let id = p.add_landmark(Landmark::new(
            LandmarkVec::new(x, y, 75.0, 55.0, 230.0),
            LandmarkCov::from_diagonal(&LandmarkVec::new(0.01, 0.01, 4.0, 4.0, 4.0)),
        ));
        (p, id)
    }

    #[test]
    fn test_matching_observation_is_matched() {
        let (mut p, id) = particle_with_landmark(1.0, 0.0);
        let outcome = associate(
            &mut p,
            &Observation::new(0.0, Color::new(77.0, 53.0, 228.0)),
            &AssociationConfig::default(),
            &noise(),
        )
        .unwrap();
        assert_eq!(outcome, Association::Matched(id));
        assert_eq!(p.hypothesis_count(), 0);
    }

    #[test]
    fn test_bearing_off_by_pi_is_rejected() {
        let (mut p, _) = particle_with_landmark(1.0, 0.0);
        let obs = Observation::new(PI, blue());
        let lm = p.landmarks().next().map(|(_, lm)| lm.clone()).unwrap();
        assert!(match_likelihood(&p.pose, &lm.mean, &lm.covariance, &obs, &noise()) < 1e-6);

        let outcome = associate(&mut p, &obs, &AssociationConfig::default(), &noise()).unwrap();
        assert!(matches!(outcome, Association::New(_)));
    }

    #[test]
    fn test_saturated_color_is_rejected() {
        let (mut p, _) = particle_with_landmark(1.0, 0.0);
        let obs = Observation::new(0.0, Color::new(255.0, 255.0, 0.0));
        let outcome = associate(&mut p, &obs, &AssociationConfig::default(), &noise()).unwrap();
        assert!(matches!(outcome, Association::New(_)));
        assert_eq!(p.landmark_count(), 1);
        assert_eq!(p.hypothesis_count(), 1);
    }

    #[test]
    fn test_best_of_two_landmarks_wins() {
        let (mut p, _) = particle_with_landmark(3.0, 0.3);
        let near = p.add_landmark(Landmark::new(
            LandmarkVec::new(3.0, 0.0, 75.0, 55.0, 230.0),
            LandmarkCov::from_diagonal(&LandmarkVec::new(0.01, 0.01, 4.0, 4.0, 4.0)),
        ));
        let outcome = associate(&mut p, &Observation::new(0.0, blue()), &AssociationConfig::default(), &noise())
            .unwrap();
        assert_eq!(outcome, Association::Matched(near));
    }

    #[test]
    fn test_hypothesis_promoted_exactly_once() {
        let mut p = Particle::new(Pose::default());
        let config = AssociationConfig::default();
        let obs = Observation::new(0.2, blue());

        let first = associate(&mut p, &obs, &config, &noise()).unwrap();
        let Association::New(hyp) = first else {
            panic!("expected a new hypothesis, got {first:?}");
        };
        assert_eq!(
            associate(&mut p, &obs, &config, &noise()).unwrap(),
            Association::Corroborated(hyp)
        );

        let third = associate(&mut p, &obs, &config, &noise()).unwrap();
        let Association::Promoted { hypothesis, landmark } = third else {
            panic!("expected promotion, got {third:?}");
        };
        assert_eq!(hypothesis, hyp);
        assert_eq!(p.hypothesis_count(), 0);
        assert_eq!(p.landmark_count(), 1);
        assert!(p.hypothesis(hyp).is_err());

        // Further sightings hit the landmark, never a second promotion
        for _ in 0..3 {
            assert_eq!(
                associate(&mut p, &obs, &config, &noise()).unwrap(),
                Association::Matched(landmark)
            );
        }
        assert_eq!(p.landmark_count(), 1);
    }

    #[test]
    fn test_threshold_one_promotes_immediately() {
        let mut p = Particle::new(Pose::default());
        let config = AssociationConfig {
            promotion_threshold: 1,
            ..AssociationConfig::default()
        };
        let outcome = associate(&mut p, &Observation::new(0.0, blue()), &config, &noise()).unwrap();
        assert!(matches!(outcome, Association::Promoted { .. }));
        assert_eq!(p.hypothesis_count(), 0);
        assert_eq!(p.landmark_count(), 1);
    }

    #[test]
    fn test_likelihood_bounded() {
        let (p, _) = particle_with_landmark(2.0, 0.0);
        let (_, lm) = p.landmarks().next().unwrap();
        let l = match_likelihood(&p.pose, &lm.mean, &lm.covariance, &Observation::new(0.0, blue()), &noise());
        assert!(l > 0.99 && l <= 1.0);
    }
}
