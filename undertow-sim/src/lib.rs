//! Undertow Sim - Local-library retrieval engine
//!
//! Serves video files from a directory as if they were arriving from a
//! swarm: metadata shows up after a delay, pieces are copied into the
//! download directory at a throttled rate in priority order, and reads wait
//! for the pieces they cover. Useful for developing players against the
//! streaming API without touching the network.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]

pub mod engine;
pub mod library;

pub use engine::{LocalSwarmFactory, LocalTransfer, SwarmConfig};
pub use library::{LibraryFile, LocalLibrary};
