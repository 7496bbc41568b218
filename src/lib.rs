//! Chunkforge — plan a codebase as dependency-ordered chunks, then generate
//! each chunk with a text-generation service.
//!
//! Every plan and every chunk outcome lands in SQLite, so a failed run
//! resumes where it stopped. BLAKE3 payload hashing. JSONL provenance log.

pub mod cli;
pub mod core;
pub mod generation;
pub mod store;
pub mod tripwire;
