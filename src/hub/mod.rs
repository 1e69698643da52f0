//! Per-channel hubs.
//!
//! A hub is the only writer of its channel's client registry. Register,
//! unregister and broadcast requests arrive over channels and are applied by
//! one control loop, so the registry needs no lock.

mod envelope;
#[allow(clippy::module_inception)]
mod hub;
mod types;

pub use envelope::{Envelope, Origin};
pub use hub::{Hub, HubConfig, HubError, HubHandle};
pub use types::{
    ClientChannels, ClientHandle, CloseReason, ConnectionId, ConnectionState, EnqueueError,
    OutboundMessage,
};
