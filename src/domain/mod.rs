//! Domain layer: connection identity, ready states, payloads and address decoding.
//!
//! These are the leaf types shared by the engine and the server
//! coordinator.

pub mod address;
pub mod connection_id;
pub mod payload;
pub mod ready_state;

pub use address::{decode_remote_address, raw_address};
pub use connection_id::ConnectionId;
pub use payload::Payload;
pub use ready_state::{AtomicReadyState, ReadyState};
