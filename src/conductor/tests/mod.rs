//! Tests for the conductor
//!
//! Organized by feature area

mod helpers;
mod interpreter_tests;
