//! Tests for the runner and worker against the in-memory store

mod helpers;

mod worker_tests;
