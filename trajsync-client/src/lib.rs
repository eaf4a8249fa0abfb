//! trajsync-client: live trajectory synchronization with a schedule server
//!
//! A [`Channel`] pairs each request with its response over one connection.
//! [`TrajectoryPoller`] polls the selected floor through a
//! [`TrajectoryManager`], and the knot and conflict helpers turn raw samples
//! into something a renderer can draw.

pub mod cli;
pub mod config;
pub mod conflicts;
pub mod connection;
pub mod knots;
pub mod manager;
pub mod poller;
pub mod spline;

pub use config::{AnimationSpeed, ClientConfig, TrajectoryAnimation};
pub use conflicts::{
    get_conflict_coords, get_conflict_segments, get_conflict_segments_with,
    get_non_conflict_segments, get_segments_by_id, get_shared_coords, position_xy,
    ConflictAnalysis, ConflictPolicy, TrajectorySplit,
};
pub use connection::{Channel, ChannelOptions, ConnectionState, Transport};
pub use knots::{raw_knots_to_knots, Knot, Pose2D, Velocity2D};
pub use manager::{DefaultTrajectoryManager, TrajectoryManager};
pub use poller::{
    FloorTrajectories, PollSettings, PollerState, TrajectoryObserver, TrajectoryPoller,
    TrajectorySnapshot,
};
pub use spline::{KnotSample, KnotSpline};
