//! trajsync-protocol: wire definitions for the trajectory schedule server
//!
//! This crate defines the request/response envelopes, the trajectory data
//! model, and the newline-delimited JSON codec used on stream sockets.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{encode_request, ClientCodec, CodecError, ServerCodec, MAX_MESSAGE_SIZE};
pub use messages::{
    Request, RequestKind, Response, ResponseHeader, TimeParam, TimeResponse, TrajectoryParam,
    TrajectoryResponse,
};
pub use types::{Conflict, RawKnot, RawPose2D, RawVelocity, Trajectory, TrajectoryCoords};
