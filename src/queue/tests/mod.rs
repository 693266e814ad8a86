//! Unit tests for the queue module.
//!
//! Domain transitions are tested directly against [`super::domain::Task`];
//! services run against the in-memory adapters with a manual clock, and a
//! mocked store covers outage handling.

mod heartbeat_tests;
