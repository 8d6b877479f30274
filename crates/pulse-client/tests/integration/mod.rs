//! Integration tests for pulse-client.
//!
//! These tests drive a real client against a local mock feed:
//! - cache seeding and live updates
//! - liveness timeout and reconnection
//! - teardown
//! - invalid frame handling

pub mod common;
