//! Plugin registry access
//!
//! [`PluginRegistry`] is the contract the rest of the workspace uses to find
//! published plugins. [`LocalRegistry`] implements it on a directory tree;
//! [`RegistryVersionQuery`] adapts any registry to the resolver.

pub mod error;
pub mod local;
pub mod query;
pub mod registry;

pub use error::{Error, Result};
pub use local::LocalRegistry;
pub use query::RegistryVersionQuery;
pub use registry::{PluginRegistry, PluginSummary, Publication, PublishReceipt};
