//! Mediaforge - upload-and-transform media job service
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod executor;
pub mod pipeline;
pub mod publisher;
pub mod server;
pub mod state;
pub mod storage;
