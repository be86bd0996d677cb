use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    capabilities::{Hooks, InterceptFn},
    factories::DynFactory,
    types::TypeInfo,
};

/// Typed handle of a node in a [GraphDraw](crate::draw::GraphDraw)
///
/// A handle is either strong (the default) or weak.
/// Depending on a weak handle only orders construction, it does not force a rebuild when the target is refreshed.
/// Use weak handles for dependencies that are only accessed through [ValueOf](crate::accessor::ValueOf)
/// or [PromiseOf](crate::accessor::PromiseOf).
pub struct Node<T> {
    index: usize,
    weak: bool,
    _type: PhantomData<fn() -> T>,
}

impl<T> Node<T> {
    pub(crate) fn new(index: usize) -> Self {
        Node {
            index,
            weak: false,
            _type: PhantomData,
        }
    }

    /// Position of the node in its draw
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// The accessor-only variant of this node, sharing its index
    pub fn weak(&self) -> Node<T> {
        Node {
            weak: true,
            ..*self
        }
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Node<T> {}

impl<T> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.weak == other.weak
    }
}
impl<T> Eq for Node<T> {}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("index", &self.index)
            .field("weak", &self.weak)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// A dependency edge, or a reverse dependent edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub index: usize,
    /// Accessor-only edges do not propagate invalidation
    pub weak: bool,
}

#[derive(Clone, Copy)]
pub(crate) struct InterceptorEdge {
    pub index: usize,
    pub info: TypeInfo,
    pub init: InterceptFn,
    pub release: InterceptFn,
}

/// Schema record of one component
pub struct NodeDescriptor {
    pub(crate) index: usize,
    pub(crate) info: TypeInfo,
    pub(crate) tag: Option<&'static str>,
    pub(crate) factory: Arc<dyn DynFactory>,
    pub(crate) hooks: Hooks,

    // Fixed once the node is built
    pub(crate) dependencies: Vec<Edge>,
    pub(crate) interceptors: Vec<InterceptorEdge>,

    // Appended to while later nodes are registered
    pub(crate) dependents: Vec<Edge>,
    pub(crate) intercepts: Vec<usize>,
}

impl NodeDescriptor {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn type_info(&self) -> TypeInfo {
        self.info
    }

    pub fn tag(&self) -> Option<&'static str> {
        self.tag
    }

    /// Nodes this node depends on, in declaration order
    pub fn dependencies(&self) -> &[Edge] {
        &self.dependencies
    }

    /// Interceptor nodes, in the order they are applied on construction
    pub fn interceptors(&self) -> impl Iterator<Item = usize> + '_ {
        self.interceptors.iter().map(|edge| edge.index)
    }

    /// Nodes depending on this node
    pub fn dependents(&self) -> &[Edge] {
        &self.dependents
    }

    /// Nodes this node intercepts
    pub fn intercepts(&self) -> &[usize] {
        &self.intercepts
    }

    /// Nodes whose construction has to wait for this node
    pub(crate) fn predecessors(&self) -> impl Iterator<Item = usize> + '_ {
        self.dependencies
            .iter()
            .map(|edge| edge.index)
            .chain(self.interceptors())
    }

    /// Nodes which are invalidated when this node changes
    pub(crate) fn invalidates(&self) -> impl Iterator<Item = usize> + '_ {
        self.dependents
            .iter()
            .filter(|edge| !edge.weak)
            .map(|edge| edge.index)
            .chain(self.intercepts.iter().copied())
    }

    /// Nodes which have to be torn down before this node
    pub(crate) fn successors(&self) -> impl Iterator<Item = usize> + '_ {
        self.dependents
            .iter()
            .map(|edge| edge.index)
            .chain(self.intercepts.iter().copied())
    }

    pub(crate) fn has_refresh_listener(&self) -> bool {
        self.hooks.refreshed.is_some()
    }
}

impl fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("index", &self.index)
            .field("type", &self.info.type_name)
            .field("tag", &self.tag)
            .field("dependencies", &self.dependencies)
            .field("interceptors", &self.interceptors().collect::<Vec<_>>())
            .field("dependents", &self.dependents)
            .field("intercepts", &self.intercepts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_variant_shares_the_index() {
        let node = Node::<String>::new(4);
        let weak = node.weak();

        assert_eq!(weak.index(), 4);
        assert!(weak.is_weak());
        assert!(!node.is_weak());
        assert_ne!(node, weak);
    }
}
