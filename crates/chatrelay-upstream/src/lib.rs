//! Boundary to the upstream chat backend.
//!
//! The relay server only talks to the backend through [`ChatBackend`]. The
//! protocol implementation itself (handshake, credentials, wire codec) lives
//! behind that trait. [`FixtureBackend`] serves a recorded snapshot and is
//! what local development and the test suites run against.

pub mod backend;
pub mod fixture;

pub use backend::{ChatBackend, EventStream};
pub use fixture::{ConnectBehavior, FixtureBackend, Snapshot};
