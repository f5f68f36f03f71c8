//! One pose hypothesis with its private map

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SlamError, SlamResult};
use crate::filters::landmark::{Hypothesis, InnovationStats, Landmark};
use crate::types::{MeasurementCov, Observation, Pose};

/// Identifier of a landmark or hypothesis, unique within one particle.
///
/// Landmarks and hypotheses draw from the same counter so a promoted
/// hypothesis never collides with an existing landmark id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type LandmarkId = FeatureId;
pub type HypothesisId = FeatureId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Particle {
    pub pose: Pose,
    pub weight: f64,
    landmarks: BTreeMap<LandmarkId, Landmark>,
    hypotheses: BTreeMap<HypothesisId, Hypothesis>,
    next_id: u64,
}

impl Particle {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            weight: 1.0,
            landmarks: BTreeMap::new(),
            hypotheses: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> FeatureId {
        let id = FeatureId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn landmarks(&self) -> impl Iterator<Item = (&LandmarkId, &Landmark)> {
        self.landmarks.iter()
    }

    pub fn hypotheses(&self) -> impl Iterator<Item = (&HypothesisId, &Hypothesis)> {
        self.hypotheses.iter()
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    pub fn hypothesis_count(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn landmark(&self, id: LandmarkId) -> SlamResult<&Landmark> {
        self.landmarks.get(&id).ok_or(SlamError::NotFound(id))
    }

    pub fn hypothesis(&self, id: HypothesisId) -> SlamResult<&Hypothesis> {
        self.hypotheses.get(&id).ok_or(SlamError::NotFound(id))
    }

    pub fn hypothesis_mut(&mut self, id: HypothesisId) -> SlamResult<&mut Hypothesis> {
        self.hypotheses.get_mut(&id).ok_or(SlamError::NotFound(id))
    }

    pub fn add_landmark(&mut self, landmark: Landmark) -> LandmarkId {
        let id = self.allocate_id();
        self.landmarks.insert(id, landmark);
        id
    }

    pub fn add_hypothesis(&mut self, hypothesis: Hypothesis) -> HypothesisId {
        let id = self.allocate_id();
        self.hypotheses.insert(id, hypothesis);
        id
    }

    /// Remove a hypothesis and insert the landmark built from it under a new id
    pub fn promote<F>(&mut self, id: HypothesisId, build: F) -> SlamResult<LandmarkId>
    where
        F: FnOnce(Hypothesis) -> Landmark,
    {
        let hypothesis = self.hypotheses.remove(&id).ok_or(SlamError::NotFound(id))?;
        Ok(self.add_landmark(build(hypothesis)))
    }

    /// Start a measurement cycle: every hypothesis counts one more miss, and
    /// those past `max_missed` are dropped. Sightings later in the cycle reset
    /// the count. Returns the number removed.
    pub fn expire_hypotheses(&mut self, max_missed: Option<u32>) -> usize {
        let Some(limit) = max_missed else {
            return 0;
        };
        let before = self.hypotheses.len();
        self.hypotheses.retain(|_, h| {
            h.missed_cycles = h.missed_cycles.saturating_add(1);
            h.missed_cycles <= limit
        });
        before - self.hypotheses.len()
    }

    /// Correct a matched landmark from the current pose
    pub fn observe_landmark(
        &mut self,
        id: LandmarkId,
        observation: &Observation,
        measurement_noise: &MeasurementCov,
    ) -> SlamResult<InnovationStats> {
        let pose = self.pose;
        let landmark = self.landmarks.get_mut(&id).ok_or(SlamError::NotFound(id))?;
        landmark.update(&pose, observation, measurement_noise)
    }
}
