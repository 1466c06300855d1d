//! Testing utilities and mock implementations
//!
//! Lets the session run against an in-memory broker instead of a TCP socket.

pub mod mocks;

pub use mocks::*;
