//! Vela Cluster
//!
//! Everything the control plane knows about the clusters it deploys to goes
//! through this crate:
//!
//! - [`ResourceRef`] / [`ObjectKey`] identify objects (identity ignores the API version)
//! - [`ClusterClient`] is the create-or-patch / get / delete / list boundary,
//!   with an in-memory and a filesystem implementation
//! - [`ClusterContext`] carries the active clients and is passed explicitly
//!   to every step invocation
//! - [`Renderer`] turns a component into opaque resource documents

mod client;
mod context;
mod error;
mod fs;
mod health;
mod memory;
mod render;
mod resource;

pub use client::ClusterClient;
pub use context::{ClusterContext, LOCAL_CLUSTER};
pub use error::ClusterError;
pub use fs::FsCluster;
pub use health::{health_message, is_healthy};
pub use memory::InMemoryCluster;
pub use render::{RenderContext, RenderError, Renderer, TemplateRenderer, labels};
pub use resource::{ObjectKey, ResourceRef, default_namespace, is_cluster_scoped};
