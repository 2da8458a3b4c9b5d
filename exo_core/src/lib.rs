//! # Exoscale Auth Core
//!
//! Shared types and traits for the instance authentication backend.
//!
//! This crate provides:
//! - Domain types for instances, roles and renewal state
//! - The [`traits::Storage`] and [`traits::ComputeDirectory`] seams
//! - [`context::RequestContext`] for cancelling remote calls

pub mod context;
pub mod traits;
pub mod types;

pub use context::RequestContext;
pub use traits::{ComputeDirectory, StaticSystemView, Storage, SystemView};
pub use types::{
    DirectoryResource, Instance, InstanceManager, InstancePool, InstanceRecord, ManagerRef,
    RenewalState, RoleName, SecurityGroup, TokenParams, INSTANCE_POOL_MANAGER, MAX_ROLE_NAME_LEN,
};
