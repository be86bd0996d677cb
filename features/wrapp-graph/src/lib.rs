//! Runtime dependency graph.
//!
//! Components are declared on a [GraphDraw] as nodes, each with a factory and explicit edges
//! to the nodes it depends on or is intercepted by.
//! A [RuntimeGraph] materializes the draw:
//! - `init` constructs every node, independent branches in parallel
//! - `refresh` rebuilds one node and whatever changes because of it,
//!   stopping at nodes whose rebuilt instance is unchanged
//! - `release` tears everything down, dependents first
//!
//! Every transition publishes a complete generation atomically or nothing at all -
//! readers never observe a half-built graph.

pub mod accessor;
pub mod capabilities;
pub mod config;
pub mod draw;
pub mod errors;
pub mod factories;
pub mod node;
pub mod runtime;
pub mod types;

pub use accessor::{PromiseOf, ValueOf};
pub use capabilities::{Close, GraphInterceptor, Lifecycle, RefreshListener};
pub use config::{ChangeDetection, GraphConfig};
pub use draw::{GraphDraw, NodeBuilder};
pub use errors::{GraphError, ReleaseError, ReleaseErrors, TransitionError};
pub use factories::InstanceFactory;
pub use node::{Edge, Node, NodeDescriptor};
pub use runtime::{Graph, Resolver, RuntimeGraph, RuntimeGraphBuilder};
pub use types::{DynError, Injectable, Instance, TypeInfo};
