//! # Exoscale Instance Authentication
//!
//! Authenticates compute instances by resolving their live attributes from
//! the compute directory and evaluating a per-role policy expression.
//!
//! - [`Backend`] exposes login, renewal and the admin operations
//! - [`store::RoleStore`] persists roles and keeps the
//!   [`identity::IdentityIndex`] consistent across identifier rotation
//! - [`resolver::resolve_instance`] builds the attribute set policies run on

pub mod backend;
pub mod cell;
pub mod identity;
pub mod login;
pub mod resolver;
pub mod role;
pub mod store;

pub use backend::{Backend, DirectoryFactory, ExoscaleDirectoryFactory};
pub use cell::ResettableCell;
pub use login::{Alias, Auth, ConnectionInfo, LoginRequest, RenewResponse};
pub use role::{RoleEntry, RoleField, RolePolicy, RoleView, RoleWriteRequest};

use serde::Serialize;

/// Operation result with non-fatal warnings for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response<T> {
    pub data: T,
    pub warnings: Vec<String>,
}

impl<T> Response<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }
}
