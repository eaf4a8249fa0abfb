//! Reconstruction of named-field knots from raw server samples

use trajsync_protocol::RawKnot;

/// Planar pose
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Planar velocity, per second
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// A sampled kinematic state along a trajectory
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Knot {
    pub pose: Pose2D,
    pub velocity: Velocity2D,
    /// Server time in milliseconds
    pub time: f64,
}

impl From<&RawKnot> for Knot {
    fn from(raw: &RawKnot) -> Self {
        let [pose_x, pose_y, pose_theta] = raw.x;
        let [velocity_x, velocity_y, velocity_theta] = raw.v;
        Knot {
            pose: Pose2D {
                x: pose_x,
                y: pose_y,
                theta: pose_theta,
            },
            velocity: Velocity2D {
                x: velocity_x,
                y: velocity_y,
                theta: velocity_theta,
            },
            time: raw.t,
        }
    }
}

/// Remap raw samples into knots, one for one and in the same order
///
/// No validation or resampling is performed.
pub fn raw_knots_to_knots(raw_knots: &[RawKnot]) -> Vec<Knot> {
    raw_knots.iter().map(Knot::from).collect()
}
