//! Cubic Hermite evaluation of reconstructed knots
//!
//! Between two consecutive knots each pose component follows
//!
//! ```text
//! p(s) = a0 + a1*s + a2*s² + a3*s³,   s ∈ [0, 1]
//! ```
//!
//! with `p(0)`, `p(1)` the knot poses and `p'(0)`, `p'(1)` the knot
//! velocities scaled by the segment duration. Knot times are in
//! milliseconds, velocities per second.

use crate::knots::{Knot, Pose2D, Velocity2D};

/// Cubic coefficients on normalized time
#[derive(Debug, Clone, Copy)]
struct CubicCoeffs {
    a0: f64,
    a1: f64,
    a2: f64,
    a3: f64,
}

impl CubicCoeffs {
    /// Hermite boundary conditions, velocities already normalized
    fn hermite(p0: f64, v0: f64, p1: f64, v1: f64) -> Self {
        Self {
            a0: p0,
            a1: v0,
            a2: 3.0 * (p1 - p0) - 2.0 * v0 - v1,
            a3: -2.0 * (p1 - p0) + v0 + v1,
        }
    }

    fn position(&self, s: f64) -> f64 {
        self.a0 + self.a1 * s + self.a2 * s * s + self.a3 * s * s * s
    }

    /// Derivative with respect to normalized time
    fn velocity(&self, s: f64) -> f64 {
        self.a1 + 2.0 * self.a2 * s + 3.0 * self.a3 * s * s
    }
}

/// Interpolated state at an arbitrary time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnotSample {
    pub time: f64,
    pub pose: Pose2D,
    pub velocity: Velocity2D,
}

impl From<&Knot> for KnotSample {
    fn from(knot: &Knot) -> Self {
        Self {
            time: knot.time,
            pose: knot.pose,
            velocity: knot.velocity,
        }
    }
}

/// Continuous path through a knot sequence
///
/// Knots are expected in ascending time order, which is how the server
/// sends them.
#[derive(Debug, Clone)]
pub struct KnotSpline {
    knots: Vec<Knot>,
}

impl KnotSpline {
    pub fn new(knots: Vec<Knot>) -> Self {
        Self { knots }
    }

    pub fn knots(&self) -> &[Knot] {
        &self.knots
    }

    pub fn start_time(&self) -> Option<f64> {
        self.knots.first().map(|k| k.time)
    }

    pub fn end_time(&self) -> Option<f64> {
        self.knots.last().map(|k| k.time)
    }

    /// Evaluate the path at `time` (ms)
    ///
    /// Returns `None` outside the covered interval.
    pub fn sample(&self, time: f64) -> Option<KnotSample> {
        let (start, end) = (self.start_time()?, self.end_time()?);
        if time < start || time > end {
            return None;
        }

        // First knot strictly after `time`
        let idx = self.knots.partition_point(|k| k.time <= time);
        if idx == 0 {
            return None;
        }
        if idx == self.knots.len() {
            let last = self.knots.last()?;
            return Some(KnotSample {
                time,
                ..KnotSample::from(last)
            });
        }

        let (k0, k1) = (&self.knots[idx - 1], &self.knots[idx]);
        Some(interpolate(k0, k1, time))
    }

    /// Evenly spaced samples from start to end, `step_ms` apart
    ///
    /// The end of the path is always included. Yields nothing for a
    /// non-positive step.
    pub fn samples(&self, step_ms: f64) -> SplineSamples<'_> {
        SplineSamples {
            spline: self,
            next: self.start_time(),
            step: step_ms,
        }
    }
}

fn interpolate(k0: &Knot, k1: &Knot, time: f64) -> KnotSample {
    let span_ms = k1.time - k0.time;
    if span_ms <= 0.0 {
        return KnotSample {
            time,
            ..KnotSample::from(k1)
        };
    }

    let span_s = span_ms / 1000.0;
    let s = (time - k0.time) / span_ms;

    let axis = |p0: f64, v0: f64, p1: f64, v1: f64| {
        let c = CubicCoeffs::hermite(p0, v0 * span_s, p1, v1 * span_s);
        (c.position(s), c.velocity(s) / span_s)
    };

    let (x, vx) = axis(k0.pose.x, k0.velocity.x, k1.pose.x, k1.velocity.x);
    let (y, vy) = axis(k0.pose.y, k0.velocity.y, k1.pose.y, k1.velocity.y);
    let (theta, vtheta) = axis(
        k0.pose.theta,
        k0.velocity.theta,
        k1.pose.theta,
        k1.velocity.theta,
    );

    KnotSample {
        time,
        pose: Pose2D { x, y, theta },
        velocity: Velocity2D {
            x: vx,
            y: vy,
            theta: vtheta,
        },
    }
}

/// Iterator returned by [`KnotSpline::samples`]
pub struct SplineSamples<'a> {
    spline: &'a KnotSpline,
    next: Option<f64>,
    step: f64,
}

impl Iterator for SplineSamples<'_> {
    type Item = KnotSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.step <= 0.0 || !self.step.is_finite() {
            return None;
        }
        let time = self.next?;
        let end = self.spline.end_time()?;

        self.next = if time >= end {
            None
        } else {
            let next = (time + self.step).min(end);
            // A step below the float resolution at `time` would never
            // advance; go straight to the end instead
            Some(if next <= time { end } else { next })
        };
        self.spline.sample(time)
    }
}
