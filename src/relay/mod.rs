//! Cross-instance relay.
//!
//! Each hub with at least one local connection holds one subscription on the
//! pub/sub bus topic for its channel. Locally produced envelopes are
//! published to that topic; frames from other instances are injected into the
//! hub's broadcast path tagged [`Origin::Relay`](crate::hub::Origin) and are
//! never published again.

mod backoff;
mod bus;
mod frame;
mod memory;
mod redis;
#[allow(clippy::module_inception)]
mod relay;

pub use backoff::{Backoff, BackoffConfig};
pub use bus::{BusSubscription, PubSubBus, RelayError};
pub use frame::RelayFrame;
pub use memory::MemoryBus;
pub use self::redis::RedisBus;
pub use relay::{Relay, RelayPublisher, RelaySubscription};
