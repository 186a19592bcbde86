//! Quillsync sync server library.
//!
//! The binary in `src/bin/server.rs` assembles these pieces; they are a
//! library so integration tests can run the full HTTP surface in-process.

pub mod server;
