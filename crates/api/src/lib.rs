//! Octohub API server library.
//!
//! Exposes the core building blocks (config, state, error handling, routes,
//! WebSocket infrastructure) so integration tests and the binary entrypoints
//! can all access them.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
