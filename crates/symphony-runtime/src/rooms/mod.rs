//! Sibling-room discovery, scoring and HTTP delegation.

mod client;
mod registry;

pub use client::{DelegationError, RoomClient};
pub use registry::RoomRegistry;
