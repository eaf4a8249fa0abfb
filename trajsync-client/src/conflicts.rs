//! Conflict segment extraction
//!
//! Two notions of equality are in play. Grouping compares projected
//! positions only (`x[0]`, `x[1]`); exclusion in
//! [`get_non_conflict_segments`] compares whole samples. Both are bit-exact.

use std::collections::{HashMap, HashSet};

use trajsync_protocol::{RawKnot, TrajectoryCoords, TrajectoryResponse};

/// How far [`get_conflict_segments_with`] scans the trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Stop after the first sample
    FirstSample,
    /// Check every sample
    #[default]
    AllSamples,
}

/// Segments of the trajectory with `id`, or `None` if no trajectory in the
/// response carries it (it may have vanished between polls)
pub fn get_segments_by_id(response: &TrajectoryResponse, id: u64) -> Option<&[RawKnot]> {
    response
        .values
        .iter()
        .find(|traj| traj.id == id)
        .map(|traj| traj.segments.as_slice())
}

/// Projected position of a sample
pub fn position_xy(segment: &RawKnot) -> TrajectoryCoords {
    segment.position()
}

/// Unique positions, in order of first occurrence
pub fn get_conflict_coords(positions: &[TrajectoryCoords]) -> Vec<TrajectoryCoords> {
    let mut seen = HashSet::with_capacity(positions.len());
    positions
        .iter()
        .filter(|p| seen.insert(**p))
        .copied()
        .collect()
}

/// Positions occurring more than once, each reported once, in the order in
/// which they were first repeated
pub fn get_shared_coords(positions: &[TrajectoryCoords]) -> Vec<TrajectoryCoords> {
    let mut counts: HashMap<TrajectoryCoords, usize> = HashMap::with_capacity(positions.len());
    let mut shared = Vec::new();
    for position in positions {
        let count = counts.entry(*position).or_insert(0);
        *count += 1;
        if *count == 2 {
            shared.push(*position);
        }
    }
    shared
}

/// Samples whose projected position equals any of `positions`
pub fn get_conflict_segments(
    trajectory_segments: &[RawKnot],
    positions: &[TrajectoryCoords],
) -> Vec<RawKnot> {
    get_conflict_segments_with(ConflictPolicy::AllSamples, trajectory_segments, positions)
}

/// [`get_conflict_segments`] with an explicit scan policy
pub fn get_conflict_segments_with(
    policy: ConflictPolicy,
    trajectory_segments: &[RawKnot],
    positions: &[TrajectoryCoords],
) -> Vec<RawKnot> {
    let scanned = match policy {
        ConflictPolicy::FirstSample => &trajectory_segments[..trajectory_segments.len().min(1)],
        ConflictPolicy::AllSamples => trajectory_segments,
    };

    scanned
        .iter()
        .filter(|segment| {
            let here = segment.position();
            positions.iter().any(|p| *p == here)
        })
        .copied()
        .collect()
}

/// Samples not fully equal to any conflict point
///
/// `None` means no conflict points were computed and returns the input
/// unchanged.
pub fn get_non_conflict_segments(
    trajectory_segments: &[RawKnot],
    conflict_points: Option<&[RawKnot]>,
) -> Vec<RawKnot> {
    let Some(conflict_points) = conflict_points else {
        return trajectory_segments.to_vec();
    };

    trajectory_segments
        .iter()
        .filter(|segment| !conflict_points.contains(segment))
        .copied()
        .collect()
}

/// One trajectory split into conflicting and free samples
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySplit {
    pub id: u64,
    pub conflict_segments: Vec<RawKnot>,
    pub non_conflict_segments: Vec<RawKnot>,
}

/// Conflict picture for one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictAnalysis {
    /// Positions visited by at least two of the conflicting trajectories
    pub shared_positions: Vec<TrajectoryCoords>,
    /// One entry per conflicting trajectory present in the response
    pub splits: Vec<TrajectorySplit>,
}

impl ConflictAnalysis {
    /// Analyse the trajectories named in the response's conflict list
    ///
    /// Conflict values are matched against trajectory ids; ids with no
    /// trajectory in `values` are skipped.
    pub fn from_response(response: &TrajectoryResponse) -> Self {
        Self::for_ids(response, &response.conflicts, ConflictPolicy::default())
    }

    /// Analyse an explicit set of trajectory ids
    pub fn for_ids(response: &TrajectoryResponse, ids: &[u64], policy: ConflictPolicy) -> Self {
        let mut involved: Vec<(u64, &[RawKnot])> = Vec::new();
        for id in ids {
            if involved.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            match get_segments_by_id(response, *id) {
                Some(segments) => involved.push((*id, segments)),
                None => tracing::debug!(id, "Conflicting trajectory not in response"),
            }
        }

        // A path revisiting its own point is not a conflict: dedup per
        // trajectory before looking for positions shared across them
        let positions: Vec<TrajectoryCoords> = involved
            .iter()
            .flat_map(|(_, segments)| {
                let own: Vec<TrajectoryCoords> = segments.iter().map(position_xy).collect();
                get_conflict_coords(&own)
            })
            .collect();
        let shared_positions = get_shared_coords(&positions);

        let splits = involved
            .into_iter()
            .map(|(id, segments)| {
                let conflict_segments =
                    get_conflict_segments_with(policy, segments, &shared_positions);
                let non_conflict_segments =
                    get_non_conflict_segments(segments, Some(&conflict_segments));
                TrajectorySplit {
                    id,
                    conflict_segments,
                    non_conflict_segments,
                }
            })
            .collect();

        Self {
            shared_positions,
            splits,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared_positions.is_empty()
    }

    pub fn split(&self, id: u64) -> Option<&TrajectorySplit> {
        self.splits.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trajsync_protocol::Trajectory;

    fn knot(t: f64, x: f64, y: f64) -> RawKnot {
        RawKnot::new(t, [x, y, 0.0], [0.0, 0.0, 0.0])
    }

    fn trajectory(id: u64, segments: Vec<RawKnot>) -> Trajectory {
        Trajectory {
            id,
            shape: "circle".into(),
            dimensions: 2,
            segments,
        }
    }

    fn c(x: f64, y: f64) -> TrajectoryCoords {
        TrajectoryCoords::new(x, y)
    }

    #[test]
    fn test_get_segments_by_id() {
        let k1 = knot(0.0, 1.0, 1.0);
        let k2 = knot(100.0, 2.0, 2.0);
        let response = TrajectoryResponse {
            values: vec![trajectory(5, vec![k1, k2])],
            conflicts: vec![],
        };
        assert_eq!(get_segments_by_id(&response, 5), Some(&[k1, k2][..]));
        assert_eq!(get_segments_by_id(&response, 6), None);
        assert_eq!(get_segments_by_id(&TrajectoryResponse::default(), 5), None);
    }

    #[test]
    fn test_conflict_coords_dedup_in_insertion_order() {
        let coords = get_conflict_coords(&[c(1.0, 1.0), c(1.0, 1.0), c(2.0, 2.0)]);
        assert_eq!(coords, vec![c(1.0, 1.0), c(2.0, 2.0)]);

        let coords = get_conflict_coords(&[c(3.0, 0.0), c(1.0, 1.0), c(3.0, 0.0)]);
        assert_eq!(coords, vec![c(3.0, 0.0), c(1.0, 1.0)]);
    }

    #[test]
    fn test_conflict_coords_idempotent() {
        let input = [c(1.0, 2.0), c(0.5, 0.5), c(1.0, 2.0), c(-1.0, 0.0), c(0.5, 0.5)];
        let once = get_conflict_coords(&input);
        assert_eq!(get_conflict_coords(&once), once);
    }

    #[test]
    fn test_conflict_coords_no_tolerance() {
        let near = 1.0 + f64::EPSILON;
        assert_eq!(get_conflict_coords(&[c(1.0, 1.0), c(near, 1.0)]).len(), 2);
    }

    #[test]
    fn test_shared_coords() {
        let shared = get_shared_coords(&[c(1.0, 1.0), c(2.0, 2.0), c(2.0, 2.0), c(1.0, 1.0), c(1.0, 1.0)]);
        assert_eq!(shared, vec![c(2.0, 2.0), c(1.0, 1.0)]);
        assert!(get_shared_coords(&[c(1.0, 1.0), c(2.0, 2.0)]).is_empty());
    }

    #[test]
    fn test_conflict_segments_all_samples() {
        let segments = vec![knot(0.0, 0.0, 0.0), knot(1.0, 1.0, 1.0), knot(2.0, 2.0, 2.0)];
        let hits = get_conflict_segments(&segments, &[c(1.0, 1.0), c(2.0, 2.0)]);
        assert_eq!(hits, vec![segments[1], segments[2]]);
    }

    #[test]
    fn test_conflict_segments_ignore_orientation_and_velocity() {
        let turned = RawKnot::new(5.0, [1.0, 1.0, 3.0], [9.0, 9.0, 9.0]);
        assert_eq!(get_conflict_segments(&[turned], &[c(1.0, 1.0)]), vec![turned]);
    }

    #[test]
    fn test_conflict_segments_first_sample_policy() {
        let segments = vec![knot(0.0, 0.0, 0.0), knot(1.0, 1.0, 1.0)];
        let positions = [c(1.0, 1.0)];
        assert!(get_conflict_segments_with(ConflictPolicy::FirstSample, &segments, &positions).is_empty());

        let positions = [c(0.0, 0.0), c(1.0, 1.0)];
        assert_eq!(
            get_conflict_segments_with(ConflictPolicy::FirstSample, &segments, &positions),
            vec![segments[0]]
        );
        assert!(get_conflict_segments_with(ConflictPolicy::FirstSample, &[], &positions).is_empty());
    }

    #[test]
    fn test_non_conflict_identity_without_points() {
        let segments = vec![knot(0.0, 0.0, 0.0), knot(1.0, 1.0, 1.0)];
        assert_eq!(get_non_conflict_segments(&segments, None), segments);
    }

    #[test]
    fn test_non_conflict_uses_full_sample_equality() {
        let a = knot(0.0, 1.0, 1.0);
        let b = knot(1.0, 2.0, 2.0);
        // Same position as `a`, different time: still a non-conflict sample
        let a_later = knot(5.0, 1.0, 1.0);

        let remaining = get_non_conflict_segments(&[a, b, a_later], Some(&[a]));
        assert_eq!(remaining, vec![b, a_later]);
        assert_eq!(get_non_conflict_segments(&[a, b], Some(&[])), vec![a, b]);
    }

    #[test]
    fn test_analysis_from_response() {
        let response = TrajectoryResponse {
            values: vec![
                trajectory(1, vec![knot(0.0, 0.0, 0.0), knot(1.0, 1.0, 1.0), knot(2.0, 2.0, 2.0)]),
                trajectory(2, vec![knot(0.0, 5.0, 5.0), knot(1.0, 2.0, 2.0)]),
                trajectory(3, vec![knot(0.0, 1.0, 1.0)]),
            ],
            conflicts: vec![1, 2, 42],
        };

        let analysis = ConflictAnalysis::from_response(&response);
        assert_eq!(analysis.shared_positions, vec![c(2.0, 2.0)]);
        assert_eq!(analysis.splits.len(), 2);

        let first = analysis.split(1).unwrap();
        assert_eq!(first.conflict_segments, vec![knot(2.0, 2.0, 2.0)]);
        assert_eq!(first.non_conflict_segments.len(), 2);

        let second = analysis.split(2).unwrap();
        assert_eq!(second.conflict_segments, vec![knot(1.0, 2.0, 2.0)]);
        assert_eq!(second.non_conflict_segments, vec![knot(0.0, 5.0, 5.0)]);

        assert!(analysis.split(3).is_none());
    }

    #[test]
    fn test_analysis_ignores_self_revisits() {
        let response = TrajectoryResponse {
            values: vec![
                trajectory(1, vec![knot(0.0, 0.0, 0.0), knot(9.0, 0.0, 0.0)]),
                trajectory(2, vec![knot(0.0, 3.0, 3.0)]),
            ],
            conflicts: vec![1, 2],
        };
        assert!(ConflictAnalysis::from_response(&response).is_empty());
    }
}
