//! Shared test fixtures for the authentication backend workspace.
//!
//! Provides:
//! - A single shared Redis testcontainer (port 6379), lazily started once
//!   per test process and skipped when Docker is unavailable
//! - [`MockDirectory`], an in-memory compute directory that counts calls
//!   and injects faults
//! - [`InstanceBuilder`] for directory instance records

mod directory;
mod fixtures;

pub use directory::{Fault, InstanceBuilder, MockDirectory};
pub use fixtures::*;
