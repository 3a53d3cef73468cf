//! Tests for the executor
//!
//! Organized by step family; end-to-end scenarios live in `scenario_tests`.

mod helpers;

mod error_tests;
mod status_tests;
