//! Transport-agnostic building blocks of the OctoHub connection hub.
//!
//! Nothing in this crate touches sockets: it owns the message envelope,
//! the signature-based admission check, the client class partition and
//! the pluggable message handler contract.

pub mod dispatch;
pub mod error;
pub mod message;
pub mod signature;
pub mod types;
