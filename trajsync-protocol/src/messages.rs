//! Request and response envelopes
//!
//! Requests are tagged by a `request` field with their parameters under
//! `param`; responses are tagged by a `response` field. A response answers
//! a request only when both tags name the same [`RequestKind`].

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Conflict, Trajectory};

/// Discriminator shared by a request and the response answering it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Trajectory,
    Time,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Trajectory => "trajectory",
            RequestKind::Time => "time",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a trajectory request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryParam {
    /// Floor (map) to fetch trajectories for
    pub map_name: String,
    /// Lookahead window in milliseconds
    pub duration: u64,
    /// Ask the server to clip results to the window
    pub trim: bool,
}

/// Parameters of a time request (always empty)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeParam {}

/// Messages sent from client to the schedule server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", content = "param", rename_all = "lowercase")]
pub enum Request {
    Trajectory(TrajectoryParam),
    Time(TimeParam),
}

impl Request {
    /// Build a trajectory request
    pub fn trajectory(map_name: impl Into<String>, duration: u64, trim: bool) -> Self {
        Request::Trajectory(TrajectoryParam {
            map_name: map_name.into(),
            duration,
            trim,
        })
    }

    /// Build a time request
    pub fn time() -> Self {
        Request::Time(TimeParam {})
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Trajectory(_) => RequestKind::Trajectory,
            Request::Time(_) => RequestKind::Time,
        }
    }
}

/// Trajectories for the requested floor and window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryResponse {
    /// `null` or a missing field decode as an empty list
    #[serde(default, deserialize_with = "null_as_empty")]
    pub values: Vec<Trajectory>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub conflicts: Vec<Conflict>,
}

/// Current server clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeResponse {
    /// Exactly one element: server time in milliseconds
    pub values: [f64; 1],
}

impl TimeResponse {
    pub fn millis(&self) -> f64 {
        self.values[0]
    }
}

/// Messages sent from the schedule server to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "lowercase")]
pub enum Response {
    Trajectory(TrajectoryResponse),
    Time(TimeResponse),
}

impl Response {
    pub fn kind(&self) -> RequestKind {
        match self {
            Response::Trajectory(_) => RequestKind::Trajectory,
            Response::Time(_) => RequestKind::Time,
        }
    }
}

/// Only the discriminator of an inbound response
///
/// Decoded before the full body so a mismatched answer is reported as a
/// protocol violation rather than a malformed message.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseHeader {
    pub response: String,
}

impl ResponseHeader {
    /// Whether this header answers a request of `kind`
    pub fn answers(&self, kind: RequestKind) -> bool {
        self.response == kind.as_str()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
