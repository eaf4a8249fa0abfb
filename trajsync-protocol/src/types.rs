//! Trajectory data model shared by the protocol and the client
//!
//! Float fields compare bit-exactly: two samples are equal only when every
//! component has the same bit pattern. No tolerance is applied anywhere.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Velocity as sent by the server: `[x, y, theta]`
pub type RawVelocity = [f64; 3];

/// Pose as sent by the server: `[x, y, theta]`
pub type RawPose2D = [f64; 3];

/// Opaque conflict identifier, only meaningful within the response that
/// produced it
pub type Conflict = u64;

/// Bit-exact equality over float slices
fn bits_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// One kinematic sample of a robot at a server timestamp
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawKnot {
    /// Server time in milliseconds
    pub t: f64,
    /// Velocity `[vx, vy, vtheta]`
    pub v: RawVelocity,
    /// Pose `[px, py, ptheta]`
    pub x: RawPose2D,
}

impl RawKnot {
    pub fn new(t: f64, x: RawPose2D, v: RawVelocity) -> Self {
        Self { t, v, x }
    }

    /// Projected 2D position, used for spatial conflict comparison
    pub fn position(&self) -> TrajectoryCoords {
        TrajectoryCoords {
            x: self.x[0],
            y: self.x[1],
        }
    }
}

impl PartialEq for RawKnot {
    fn eq(&self, other: &Self) -> bool {
        self.t.to_bits() == other.t.to_bits()
            && bits_eq(&self.v, &other.v)
            && bits_eq(&self.x, &other.x)
    }
}

impl Eq for RawKnot {}

/// Projected position of a knot; orientation and velocity are ignored
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrajectoryCoords {
    pub x: f64,
    pub y: f64,
}

impl TrajectoryCoords {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl PartialEq for TrajectoryCoords {
    fn eq(&self, other: &Self) -> bool {
        self.x.to_bits() == other.x.to_bits() && self.y.to_bits() == other.y.to_bits()
    }
}

impl Eq for TrajectoryCoords {}

impl Hash for TrajectoryCoords {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
        self.y.to_bits().hash(state);
    }
}

/// A robot path segment over the requested time window
///
/// `id` is unique per robot path segment within one response, not across
/// responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: u64,
    pub shape: String,
    pub dimensions: u32,
    /// Samples in ascending `t` order
    #[serde(default)]
    pub segments: Vec<RawKnot>,
}

impl Trajectory {
    /// Time span covered by the segments, if any
    pub fn time_span(&self) -> Option<(f64, f64)> {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => Some((first.t, last.t)),
            _ => None,
        }
    }
}
