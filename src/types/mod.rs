pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{SlamError, SlamResult};

/// Wrap an angle into (−π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Radians, kept in (−π, π]
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: normalize_angle(heading),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub linear_velocity: f64,
    pub angular_velocity: f64,
}

impl ControlCommand {
    pub fn new(linear_velocity: f64, angular_velocity: f64) -> Self {
        Self {
            linear_velocity,
            angular_velocity,
        }
    }
}

/// Color signature, channels on a 0-255 scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }
}

/// One bearing + color sighting, bearing relative to the current heading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub bearing: f64,
    pub color: Color,
}

impl Observation {
    pub fn new(bearing: f64, color: Color) -> Self {
        Self { bearing, color }
    }

    /// Measurement vector (bearing, r, g, b)
    pub fn as_vector(&self) -> MeasurementVec {
        MeasurementVec::new(self.bearing, self.color.r, self.color.g, self.color.b)
    }
}

/// Published pose summary
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl From<Pose> for PoseEstimate {
    fn from(pose: Pose) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            heading: pose.heading,
        }
    }
}

/// Inbound message, one JSON object per line.
///
/// `stamp` is seconds on the sender's monotonic clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Command {
        stamp: f64,
        linear_velocity: f64,
        angular_velocity: f64,
    },
    Observations {
        stamp: f64,
        observations: Vec<Observation>,
    },
}

impl Message {
    pub fn parse_line(line: &str) -> SlamResult<Self> {
        let message: Message = serde_json::from_str(line)?;
        message.validate()?;
        Ok(message)
    }

    pub fn stamp(&self) -> f64 {
        match self {
            Message::Command { stamp, .. } | Message::Observations { stamp, .. } => *stamp,
        }
    }

    /// Reject values the filter cannot digest
    pub fn validate(&self) -> SlamResult<()> {
        let stamp = self.stamp();
        if !(stamp.is_finite() && stamp >= 0.0) {
            return Err(SlamError::InvalidMessage(format!("bad stamp {stamp}")));
        }
        match self {
            Message::Command {
                linear_velocity,
                angular_velocity,
                ..
            } => {
                if !(linear_velocity.is_finite() && angular_velocity.is_finite()) {
                    return Err(SlamError::InvalidMessage("non-finite velocity".into()));
                }
            }
            Message::Observations { observations, .. } => {
                for (i, obs) in observations.iter().enumerate() {
                    if !obs.bearing.is_finite() {
                        return Err(SlamError::InvalidMessage(format!("observation {i}: non-finite bearing")));
                    }
                    let channels = [obs.color.r, obs.color.g, obs.color.b];
                    if channels.iter().any(|c| !(0.0..=255.0).contains(c)) {
                        return Err(SlamError::InvalidMessage(format!(
                            "observation {i}: color outside 0-255"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_angle_range() {
        assert_abs_diff_eq!(normalize_angle(0.0), 0.0);
        assert_abs_diff_eq!(normalize_angle(PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(-PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(-5.0 * PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(7.0), 7.0 - 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_new_wraps_heading() {
        let pose = Pose::new(1.0, 2.0, 2.0 * PI + 0.5);
        assert_abs_diff_eq!(pose.heading, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_observation_vector_layout() {
        let obs = Observation::new(0.25, Color::new(10.0, 20.0, 30.0));
        let z = obs.as_vector();
        assert_eq!(z[0], 0.25);
        assert_eq!(z[3], 30.0);
    }

    #[test]
    fn test_parse_messages() {
        let cmd = Message::parse_line(
            r#"{"type":"command","stamp":1.5,"linear_velocity":0.2,"angular_velocity":-0.1}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Message::Command {
                stamp: 1.5,
                linear_velocity: 0.2,
                angular_velocity: -0.1
            }
        );

        let obs = Message::parse_line(
            r#"{"type":"observations","stamp":2.0,"observations":[{"bearing":0.3,"color":{"r":161,"g":77,"b":137}}]}"#,
        )
        .unwrap();
        assert_eq!(obs.stamp(), 2.0);
        match obs {
            Message::Observations { observations, .. } => {
                assert_eq!(observations[0].color, Color::new(161.0, 77.0, 137.0))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_messages_rejected() {
        let out_of_range = r#"{"type":"observations","stamp":0,"observations":[{"bearing":0,"color":{"r":300,"g":0,"b":0}}]}"#;
        assert!(matches!(
            Message::parse_line(out_of_range),
            Err(SlamError::InvalidMessage(_))
        ));

        let negative_stamp = r#"{"type":"command","stamp":-1,"linear_velocity":0,"angular_velocity":0}"#;
        assert!(Message::parse_line(negative_stamp).is_err());

        assert!(matches!(
            Message::parse_line(r#"{"type":"teleport"}"#),
            Err(SlamError::Parse(_))
        ));
    }
}
