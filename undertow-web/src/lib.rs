//! Undertow Web - HTTP surface of the streaming controller
//!
//! JSON status endpoints plus the byte-range video endpoint. Every request
//! goes through the session registry; this crate only translates between
//! HTTP and registry attachments.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]

pub mod error;
pub mod handlers;
pub mod server;
pub mod streaming;

pub use error::ApiError;
pub use server::{AppState, build_router, run_server};
