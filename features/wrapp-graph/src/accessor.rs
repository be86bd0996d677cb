use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
};

use crate::{
    errors::{GraphError, TransitionError},
    node::Node,
    runtime::GraphInner,
    types::Injectable,
};

/// Live binding to the current instance of a node
///
/// Never caches: every [ValueOf::get] reads the slot of the latest published generation,
/// so it follows refreshes triggered by anyone.
///
/// Holds the graph weakly, components holding a `ValueOf` do not keep the graph alive.
pub struct ValueOf<T> {
    graph: Weak<GraphInner>,
    node: Node<T>,
}

impl<T: Injectable> ValueOf<T> {
    pub(crate) fn new(graph: Weak<GraphInner>, node: Node<T>) -> Self {
        ValueOf { graph, node }
    }

    pub fn node(&self) -> Node<T> {
        self.node
    }

    /// The current instance of the node
    pub fn get(&self) -> Result<Arc<T>, GraphError> {
        let graph = self.graph.upgrade().ok_or(GraphError::GraphDropped)?;
        graph.instance(self.node.index())?.cast()
    }

    /// Refreshes the node and everything depending on it
    ///
    /// Blocks until the refresh completed, must not be called from within a factory.
    pub fn refresh(&self) -> Result<(), TransitionError> {
        let graph = self.graph.upgrade().ok_or(GraphError::GraphDropped)?;
        graph.refresh(self.node.index())
    }
}

impl<T> Clone for ValueOf<T> {
    fn clone(&self) -> Self {
        ValueOf {
            graph: self.graph.clone(),
            node: self.node,
        }
    }
}

impl<T> fmt::Debug for ValueOf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueOf").field(&self.node).finish()
    }
}

/// Where a promise finds its graph, set at most once
#[derive(Default)]
pub(crate) struct PromiseBinding {
    graph: OnceLock<Weak<GraphInner>>,
}

impl PromiseBinding {
    pub(crate) fn bound(graph: Weak<GraphInner>) -> Self {
        let binding = Self::default();
        binding.bind(graph);
        binding
    }

    pub(crate) fn bind(&self, graph: Weak<GraphInner>) {
        if self.graph.set(graph).is_err() {
            tracing::warn!("Promise is already bound to another graph - keeping the first binding");
        }
    }
}

/// Deferred binding to the instance of a node
///
/// Can be created from a [GraphDraw](crate::draw::GraphDraw) before any runtime graph exists.
/// Resolves lazily: [PromiseOf::get] returns `None` until a generation holding the node is published.
pub struct PromiseOf<T> {
    binding: Arc<PromiseBinding>,
    node: Node<T>,
}

impl<T: Injectable> PromiseOf<T> {
    pub(crate) fn new(binding: Arc<PromiseBinding>, node: Node<T>) -> Self {
        PromiseOf { binding, node }
    }

    pub fn node(&self) -> Node<T> {
        self.node
    }

    /// True once the promise knows the graph it resolves against
    pub fn is_bound(&self) -> bool {
        self.binding.graph.get().is_some()
    }

    /// The published instance, if there is one yet
    ///
    /// Instances of a transition still in flight are never visible here,
    /// factories read those through their [Resolver](crate::runtime::Resolver).
    pub fn get(&self) -> Option<Arc<T>> {
        let graph = self.binding.graph.get()?.upgrade()?;
        let instance = graph.instance(self.node.index()).ok()?;

        match instance.cast() {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!("Promise could not resolve node #{}: {error}", self.node.index());
                None
            }
        }
    }
}

impl<T> Clone for PromiseOf<T> {
    fn clone(&self) -> Self {
        PromiseOf {
            binding: self.binding.clone(),
            node: self.node,
        }
    }
}

impl<T> fmt::Debug for PromiseOf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseOf")
            .field("node", &self.node)
            .field("bound", &self.binding.graph.get().is_some())
            .finish()
    }
}
