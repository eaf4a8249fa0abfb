//! Connection to the schedule server
//!
//! Provides the socket transports and the correlation channel that pairs
//! each request with the response answering it.

mod channel;
mod transport;

pub use channel::{
    Channel, ChannelOptions, ConnectionState, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
};
pub use transport::{StreamTrait, Transport};
