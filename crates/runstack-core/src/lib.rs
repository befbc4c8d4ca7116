//! runstack-core: stack config, resource model, and dependency graph.
//!
//! A stack file describes one containerised service: the platform APIs it
//! needs, its image, one secret, and the service itself. [`build_graph`]
//! turns that description into a [`StackGraph`] of resources with explicit
//! ordering edges for an external orchestration engine to apply.

pub mod builder;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod graph;
pub mod identity;
pub mod image;
pub mod lifecycle;
pub mod types;

pub use builder::{URL_OUTPUT, build_graph, enablement_name, evaluate};
pub use config::StackConfig;
pub use error::{ConfigError, ConfigResult, GraphError, GraphResult};
pub use graph::{GapReason, GraphBuilder, OrderingGap, StackGraph};
pub use identity::{DefaultComputeIdentity, Identity, IdentityResolver, StaticIdentity, resolver_for};
pub use image::ImageRef;
pub use lifecycle::{LifecycleError, SecretLifecycle, SecretPhase};
pub use types::*;
