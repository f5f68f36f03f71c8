use thiserror::Error;

use crate::filters::particle::FeatureId;

/// FastSLAM error types
#[derive(Error, Debug)]
pub enum SlamError {
    #[error("Particle set is empty (particle_count must be >= 1)")]
    EmptyParticleSet,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature {0} not found")]
    NotFound(FeatureId),

    #[error("Innovation covariance is singular")]
    SingularInnovation,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type SlamResult<T> = Result<T, SlamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            SlamError::NotFound(FeatureId(7)).to_string(),
            "Feature #7 not found"
        );
        assert!(SlamError::InvalidConfig("bad".into())
            .to_string()
            .contains("bad"));
    }
}
