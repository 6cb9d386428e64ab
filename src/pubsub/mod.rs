//! Topic publish/subscribe.
//!
//! [`TopicBroker`] is the engine's native broadcast primitive: it tracks
//! which sockets subscribe to which topic filters and fans published
//! messages out to them. Connection handles and the server coordinator
//! both forward to it.

pub mod broker;
pub mod topic;

pub use broker::{Subscriber, TopicBroker};
