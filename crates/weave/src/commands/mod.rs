//! Command implementations for the weave CLI
//!
//! Each command module handles the CLI interface and delegates to
//! weave-template for the actual work.

pub mod check;
pub mod render;
