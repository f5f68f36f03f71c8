//! FastSLAM 1.0 engine
//!
//! Owns the particle set and drives it from two message streams:
//! - commands: zero-order hold, each particle advanced by the held command
//! - observation batches: association, EKF update and weighting per particle,
//!   followed by low-variance resampling of the whole set
//!
//! Processing is strictly sequential; every call runs to completion.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{AssociationConfig, EstimateMode, SlamConfig};
use crate::error::{SlamError, SlamResult};
use crate::filters::association::{associate, Association};
use crate::filters::landmark::Landmark;
use crate::filters::motion_model::{advance, jitter};
use crate::filters::particle::Particle;
use crate::filters::resampling::{effective_sample_size, low_variance_resample};
use crate::types::{ControlCommand, MeasurementCov, Message, Observation, PoseEstimate};

/// Engine state snapshot for status output
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FastSlamState {
    /// Published pose estimate
    pub estimate: PoseEstimate,

    /// Number of particles M
    pub particle_count: usize,

    /// Effective sample size before the last resampling
    pub effective_sample_size: f64,

    /// Map size of the highest-weight particle
    pub best_landmarks: usize,
    pub best_hypotheses: usize,

    /// Timestamp of the last processed message [s]
    pub last_stamp: Option<f64>,

    /// Update counters
    pub command_updates: u64,
    pub observation_cycles: u64,
    pub observations_processed: u64,
}

pub struct FastSlam<R: Rng = StdRng> {
    config: SlamConfig,
    measurement_noise: MeasurementCov,
    particles: Vec<Particle>,
    rng: R,

    /// Command held between messages
    last_command: ControlCommand,
    last_stamp: Option<f64>,

    last_effective_sample_size: f64,

    /// Update counters
    command_updates: u64,
    observation_cycles: u64,
    observations_processed: u64,
}

impl FastSlam<StdRng> {
    /// Engine seeded from the config, or from entropy when no seed is set
    pub fn new(config: SlamConfig) -> SlamResult<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }
}

impl<R: Rng> FastSlam<R> {
    pub fn with_rng(config: SlamConfig, mut rng: R) -> SlamResult<Self> {
        config.validate()?;

        let mut template = Particle::new(config.initial_pose);
        for seed in &config.seed_landmarks {
            let mut landmark = Landmark::anchor(seed.x, seed.y, seed.color, seed.variance);
            landmark.immutable = seed.immutable;
            template.add_landmark(landmark);
        }

        let particles: Vec<Particle> = (0..config.particle_count)
            .map(|_| {
                let mut particle = template.clone();
                particle.pose = jitter(&config.initial_pose, &config.initial_spread, &mut rng);
                particle
            })
            .collect();

        log::info!(
            "FastSLAM engine: {} particles, {} seed landmarks ({} immutable)",
            particles.len(),
            config.seed_landmarks.len(),
            config.seed_landmarks.iter().filter(|s| s.immutable).count()
        );

        Ok(Self {
            measurement_noise: config.measurement_noise(),
            last_effective_sample_size: particles.len() as f64,
            config,
            particles,
            rng,
            last_command: ControlCommand::default(),
            last_stamp: None,
            command_updates: 0,
            observation_cycles: 0,
            observations_processed: 0,
        })
    }

    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Motion update of every particle over an explicit `dt`
    pub fn predict(&mut self, command: &ControlCommand, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        for particle in self.particles.iter_mut() {
            particle.pose = advance(&particle.pose, command, dt, &self.config.motion, &mut self.rng);
        }
    }

    /// Integrate the held command up to `stamp`
    fn advance_to(&mut self, stamp: f64) {
        let dt = match self.last_stamp {
            None => 0.0,
            Some(last) if stamp < last => {
                log::warn!(
                    "Timestamp {:.3}s earlier than last update {:.3}s; treating as dt = 0",
                    stamp,
                    last
                );
                return;
            }
            Some(last) => stamp - last,
        };
        self.last_stamp = Some(stamp);

        let command = self.last_command;
        self.predict(&command, dt);
    }

    /// Advance by the previously held command, then hold `command`
    pub fn apply_command(&mut self, command: ControlCommand, stamp: f64) -> PoseEstimate {
        self.advance_to(stamp);
        self.last_command = command;
        self.command_updates += 1;
        self.summary()
    }

    /// Advance to `stamp`, run one measurement cycle and resample
    pub fn apply_observations(&mut self, observations: &[Observation], stamp: f64) -> PoseEstimate {
        self.advance_to(stamp);
        self.measurement_update(observations);
        self.summary()
    }

    /// Dispatch one inbound message
    pub fn apply_message(&mut self, message: &Message) -> PoseEstimate {
        match message {
            Message::Command {
                stamp,
                linear_velocity,
                angular_velocity,
            } => self.apply_command(ControlCommand::new(*linear_velocity, *angular_velocity), *stamp),
            Message::Observations {
                stamp,
                observations,
            } => self.apply_observations(observations, *stamp),
        }
    }

    /// One measurement cycle at the current poses, followed by resampling
    pub fn measurement_update(&mut self, observations: &[Observation]) {
        let max_missed = self.config.association.hypothesis_max_missed;
        let mut expired = 0;
        for particle in self.particles.iter_mut() {
            expired += particle.expire_hypotheses(max_missed);
            particle.weight = 1.0;
            for observation in observations {
                particle.weight *= observation_weight(
                    particle,
                    observation,
                    &self.config.association,
                    &self.measurement_noise,
                );
            }
        }

        let weights: Vec<f64> = self.particles.iter().map(|p| p.weight).collect();
        self.last_effective_sample_size = effective_sample_size(&weights);
        self.particles = low_variance_resample(&self.particles, &mut self.rng);

        self.observation_cycles += 1;
        self.observations_processed += observations.len() as u64;
        if expired > 0 {
            log::debug!("Dropped {} unseen hypotheses across particles", expired);
        }
        log::debug!(
            "Measurement cycle {}: {} observations, ESS {:.1}",
            self.observation_cycles,
            observations.len(),
            self.last_effective_sample_size
        );
    }

    /// Particle with the largest weight (first on ties)
    pub fn best_particle(&self) -> &Particle {
        let first = &self.particles[0];
        self.particles[1..]
            .iter()
            .fold(first, |best, p| if p.weight > best.weight { p } else { best })
    }

    /// Pose estimate according to the configured mode
    pub fn summary(&self) -> PoseEstimate {
        match self.config.estimate {
            EstimateMode::HighestWeight => self.best_particle().pose.into(),
            EstimateMode::WeightedMean => self.weighted_mean(),
        }
    }

    fn weighted_mean(&self) -> PoseEstimate {
        let weight_of = |p: &Particle| if p.weight.is_finite() { p.weight.max(0.0) } else { 0.0 };
        let total: f64 = self.particles.iter().map(weight_of).sum();
        let uniform = !(total.is_finite() && total > 0.0);

        let (mut x, mut y, mut sin, mut cos, mut sum) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for p in &self.particles {
            let w = if uniform { 1.0 } else { weight_of(p) };
            x += w * p.pose.x;
            y += w * p.pose.y;
            sin += w * p.pose.heading.sin();
            cos += w * p.pose.heading.cos();
            sum += w;
        }

        PoseEstimate {
            x: x / sum,
            y: y / sum,
            heading: sin.atan2(cos),
        }
    }

    /// Get current state snapshot
    pub fn get_state(&self) -> FastSlamState {
        let best = self.best_particle();
        FastSlamState {
            estimate: self.summary(),
            particle_count: self.particles.len(),
            effective_sample_size: self.last_effective_sample_size,
            best_landmarks: best.landmark_count(),
            best_hypotheses: best.hypothesis_count(),
            last_stamp: self.last_stamp,
            command_updates: self.command_updates,
            observation_cycles: self.observation_cycles,
            observations_processed: self.observations_processed,
        }
    }
}

/// Importance factor contributed by one observation to one particle
fn observation_weight(
    particle: &mut Particle,
    observation: &Observation,
    config: &AssociationConfig,
    measurement_noise: &MeasurementCov,
) -> f64 {
    let id = match associate(particle, observation, config, measurement_noise) {
        Ok(Association::Matched(id)) => id,
        Ok(_) => return config.no_match_weight,
        Err(e) => {
            invariant_fault(&e);
            return 1.0;
        }
    };

    match particle.observe_landmark(id, observation, measurement_noise) {
        Ok(stats) => {
            let likelihood = stats.likelihood();
            if likelihood.is_finite() {
                likelihood
            } else {
                log::debug!("Non-finite likelihood for landmark {}; using floor weight", id);
                config.floor_weight
            }
        }
        Err(SlamError::SingularInnovation) => {
            log::debug!("Singular innovation covariance for landmark {}; update skipped", id);
            config.floor_weight
        }
        Err(e) => {
            invariant_fault(&e);
            1.0
        }
    }
}

/// Engine-managed ids are never dangling; fatal in debug builds
fn invariant_fault(err: &SlamError) {
    log::error!("Invariant violation: {}", err);
    debug_assert!(false, "invariant violation: {err}");
}
