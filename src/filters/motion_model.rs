//! Midpoint-heading motion model
//!
//! The agent pivots halfway through the heading change, drives straight, then
//! finishes the turn:
//!
//! ```text
//!  prev     heading_1            heading_2
//!   o ------------------------- o
//! ```
//!
//! Translation uses heading_1; the final orientation is heading_2. Gaussian
//! noise is injected on the distance and on each half turn, scaled by the
//! command magnitudes so faster motion spreads the particles further.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::MotionNoise;
use crate::types::{normalize_angle, ControlCommand, Pose};

/// Noise std-devs for one motion step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepNoise {
    pub drive_std: f64,
    pub turn_std: f64,
}

impl MotionNoise {
    /// Std-devs for a command held over `dt` seconds
    pub fn step_noise(&self, command: &ControlCommand, dt: f64) -> StepNoise {
        let v = command.linear_velocity.abs();
        let w = command.angular_velocity.abs();
        StepNoise {
            drive_std: (self.drive_from_linear * v + self.drive_from_angular * w) * dt,
            turn_std: (self.turn_from_angular * w + self.turn_from_linear * v) * dt,
        }
    }
}

/// Zero-mean Gaussian draw; a zero std-dev never touches the RNG
fn gaussian<R: Rng>(rng: &mut R, std: f64) -> f64 {
    if std <= 0.0 {
        return 0.0;
    }
    let n: f64 = rng.sample(StandardNormal);
    n * std
}

/// Noise-free midpoint step given explicit noise terms.
///
/// `drive_noise` is added to the travelled distance, `turn_noise` to each half
/// of the heading change.
pub fn advance_with(
    pose: &Pose,
    command: &ControlCommand,
    dt: f64,
    drive_noise: f64,
    turn_noise: (f64, f64),
) -> Pose {
    let dheading = command.angular_velocity * dt;
    let ds = command.linear_velocity * dt + drive_noise;

    let heading_1 = pose.heading + dheading / 2.0 + turn_noise.0;
    let heading_2 = heading_1 + dheading / 2.0 + turn_noise.1;

    Pose {
        x: pose.x + ds * heading_1.cos(),
        y: pose.y + ds * heading_1.sin(),
        heading: normalize_angle(heading_2),
    }
}

/// Sample a new pose for one particle
pub fn advance<R: Rng>(
    pose: &Pose,
    command: &ControlCommand,
    dt: f64,
    noise: &MotionNoise,
    rng: &mut R,
) -> Pose {
    if dt <= 0.0 {
        return *pose;
    }
    let step = noise.step_noise(command, dt);
    let drive_noise = gaussian(rng, step.drive_std);
    let turn_noise = (gaussian(rng, step.turn_std), gaussian(rng, step.turn_std));
    advance_with(pose, command, dt, drive_noise, turn_noise)
}

/// Initial pose plus independent Gaussian jitter on (x, y, heading)
pub fn jitter<R: Rng>(pose: &Pose, spread: &[f64; 3], rng: &mut R) -> Pose {
    Pose::new(
        pose.x + gaussian(rng, spread[0]),
        pose.y + gaussian(rng, spread[1]),
        pose.heading + gaussian(rng, spread[2]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_straight_line_noise_free() {
        let mut rng = StdRng::seed_from_u64(1);
        let pose = advance(
            &Pose::default(),
            &ControlCommand::new(1.0, 0.0),
            1.0,
            &MotionNoise::zero(),
            &mut rng,
        );
        assert_abs_diff_eq!(pose.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.heading, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_translation_uses_sine_for_y() {
        // Facing +y, driving forward must move along y only
        let start = Pose::new(0.0, 0.0, FRAC_PI_2);
        let pose = advance_with(&start, &ControlCommand::new(2.0, 0.0), 1.0, 0.0, (0.0, 0.0));
        assert_abs_diff_eq!(pose.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_midpoint_heading() {
        // Quarter turn while driving 1 m: translation along the 45° midpoint
        let pose = advance_with(
            &Pose::default(),
            &ControlCommand::new(1.0, FRAC_PI_2),
            1.0,
            0.0,
            (0.0, 0.0),
        );
        let half = (PI / 4.0).cos();
        assert_abs_diff_eq!(pose.x, half, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.y, half, epsilon = 1e-12);
        assert_abs_diff_eq!(pose.heading, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_wraps() {
        let start = Pose::new(0.0, 0.0, PI - 0.1);
        let pose = advance_with(&start, &ControlCommand::new(0.0, 0.4), 1.0, 0.0, (0.0, 0.0));
        assert_abs_diff_eq!(pose.heading, -PI + 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_dt_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let start = Pose::new(1.0, 2.0, 0.3);
        let pose = advance(
            &start,
            &ControlCommand::new(5.0, 1.0),
            0.0,
            &MotionNoise::default(),
            &mut rng,
        );
        assert_eq!(pose, start);
    }

    #[test]
    fn test_noise_scales_with_speed() {
        let noise = MotionNoise::default();
        let slow = noise.step_noise(&ControlCommand::new(0.5, 0.1), 1.0);
        let fast = noise.step_noise(&ControlCommand::new(2.0, 0.4), 1.0);
        assert!(fast.drive_std > slow.drive_std);
        assert!(fast.turn_std > slow.turn_std);

        let stopped = noise.step_noise(&ControlCommand::default(), 1.0);
        assert_eq!(stopped.drive_std, 0.0);
        assert_eq!(stopped.turn_std, 0.0);
    }

    #[test]
    fn test_zero_jitter_is_identity() {
        let mut rng = StdRng::seed_from_u64(4);
        let start = Pose::new(-1.0, 0.5, 1.0);
        assert_eq!(jitter(&start, &[0.0; 3], &mut rng), start);
        assert_ne!(jitter(&start, &[0.1, 0.1, 0.01], &mut rng), start);
    }

    #[test]
    fn test_independent_draws_spread_particles() {
        let mut rng = StdRng::seed_from_u64(9);
        let command = ControlCommand::new(1.0, 0.2);
        let poses: Vec<Pose> = (0..50)
            .map(|_| advance(&Pose::default(), &command, 1.0, &MotionNoise::default(), &mut rng))
            .collect();
        let mean_x = poses.iter().map(|p| p.x).sum::<f64>() / poses.len() as f64;
        let var_x = poses.iter().map(|p| (p.x - mean_x).powi(2)).sum::<f64>() / poses.len() as f64;
        assert!(var_x > 0.0);
        assert!((mean_x - 1.0).abs() < 0.1);
    }
}
