//! Core pipeline logic — types, extraction, planning, execution, reporting.

pub mod config;
pub mod error;
pub mod executor;
pub mod export;
pub mod extract;
pub mod planner;
pub mod progress;
pub mod prompt;
pub mod resolver;
pub mod runner;
pub mod sanitize;
#[cfg(test)]
pub mod testkit;
pub mod types;
