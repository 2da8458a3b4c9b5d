//! # Exoscale Directory Client
//!
//! Reads instances, instance pools and security groups from the Exoscale
//! API v2, signing every request with the configured API key.
//!
//! HTTP 404 maps to [`errors::DirectoryError::NotFound`]; every other
//! failure keeps its own variant so callers never mistake it for a missing
//! resource.

pub mod client;
mod models;
pub mod signer;

pub use client::ExoscaleClient;
