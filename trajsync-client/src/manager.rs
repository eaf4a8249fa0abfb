//! Trajectory manager: the two operations consumers may invoke

use std::future::Future;

use trajsync_protocol::{
    Request, Response, TimeParam, TimeResponse, TrajectoryParam, TrajectoryResponse,
};
use trajsync_utils::{Result, TrajsyncError};

use crate::connection::{Channel, ChannelOptions, ConnectionState};

/// Source of trajectory data and server time
pub trait TrajectoryManager: Send + Sync + 'static {
    /// Current server clock
    fn server_time(&self, param: TimeParam) -> impl Future<Output = Result<TimeResponse>> + Send;

    /// Trajectories for one floor and lookahead window
    fn latest_trajectory(
        &self,
        param: TrajectoryParam,
    ) -> impl Future<Output = Result<TrajectoryResponse>> + Send;

    /// Whether requests can currently be issued
    fn is_available(&self) -> bool {
        true
    }
}

/// Manager backed by a [`Channel`] to the schedule server
#[derive(Debug, Clone)]
pub struct DefaultTrajectoryManager {
    channel: Channel,
}

impl DefaultTrajectoryManager {
    /// Connect to the schedule server at `addr`
    pub async fn connect(addr: &str, options: ChannelOptions) -> Result<Self> {
        let channel = Channel::open_with(addr, options).await?;
        Ok(Self { channel })
    }

    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Close the underlying channel
    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl TrajectoryManager for DefaultTrajectoryManager {
    async fn server_time(&self, param: TimeParam) -> Result<TimeResponse> {
        match self.channel.call(Request::Time(param)).await? {
            Response::Time(resp) => Ok(resp),
            other => Err(unexpected(&other)),
        }
    }

    async fn latest_trajectory(&self, param: TrajectoryParam) -> Result<TrajectoryResponse> {
        let map_name = param.map_name.clone();
        match self.channel.call(Request::Trajectory(param)).await? {
            Response::Trajectory(resp) => {
                tracing::trace!(
                    map_name = %map_name,
                    trajectories = resp.values.len(),
                    conflicts = resp.conflicts.len(),
                    "Trajectory response"
                );
                Ok(resp)
            }
            other => Err(unexpected(&other)),
        }
    }

    fn is_available(&self) -> bool {
        self.channel.state() == ConnectionState::Connected
    }
}

// The channel already rejects mismatched tags; kept for exhaustiveness
fn unexpected(resp: &Response) -> TrajsyncError {
    TrajsyncError::protocol(format!("unexpected {} response", resp.kind()))
}
