use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    accessor::{PromiseBinding, PromiseOf},
    capabilities::{self, GraphInterceptor, Hooks, Lifecycle, RefreshListener},
    errors::GraphError,
    factories::{DynFactory, ExistingInstance, InstanceFactory},
    node::{Edge, InterceptorEdge, Node, NodeDescriptor},
    runtime::working::Resolver,
    types::{DynError, Injectable, TypeInfo},
};

/// Schema of a graph: every node with its edges, in declaration order
///
/// Declaration order is a valid topological order -
/// a node can only depend on, or be intercepted by, nodes registered before it.
///
/// # Example
/// ```rust
/// use wrapp_graph::draw::GraphDraw;
///
/// struct Config { url: &'static str }
/// struct Client { url: &'static str }
///
/// let mut draw = GraphDraw::new("app");
/// let config = draw.add_instance(Config { url: "localhost" }).build();
/// let client = draw
///     .add_node(move |graph| {
///         let config = graph.get(&config)?;
///         Ok(Client { url: config.url })
///     })
///     .depends_on(&config)
///     .build();
///
/// assert_eq!(draw.len(), 2);
/// assert_eq!(draw.nodes()[config.index()].dependents()[0].index, client.index());
/// ```
pub struct GraphDraw {
    name: String,
    nodes: Vec<NodeDescriptor>,
    /// Promises handed out before any engine existed
    pub(crate) promises: Vec<Arc<PromiseBinding>>,
}

impl GraphDraw {
    pub fn new(name: impl Into<String>) -> Self {
        GraphDraw {
            name: name.into(),
            nodes: Vec::new(),
            promises: Vec::new(),
        }
    }

    /// Registers a node constructed by the given closure
    pub fn add_node<T, F>(&mut self, factory: F) -> NodeBuilder<'_, T>
    where
        T: Injectable,
        F: Fn(&Resolver) -> Result<T, DynError> + Send + Sync + 'static,
    {
        self.register(Arc::new(factory))
    }

    /// Registers a node constructed by the given factory
    pub fn add_factory<Factory: InstanceFactory>(
        &mut self,
        factory: Factory,
    ) -> NodeBuilder<'_, Factory::Provides> {
        self.register(Arc::new(factory))
    }

    /// Registers an already created instance
    ///
    /// Refreshing such a node always yields the same allocation.
    pub fn add_instance<T: Injectable>(&mut self, instance: T) -> NodeBuilder<'_, T> {
        self.register(Arc::new(ExistingInstance(Arc::new(instance))))
    }

    fn register<T: Injectable>(&mut self, factory: Arc<dyn DynFactory>) -> NodeBuilder<'_, T> {
        NodeBuilder {
            draw: self,
            factory,
            tag: None,
            hooks: Hooks::default(),
            dependencies: Vec::new(),
            interceptors: Vec::new(),
            _type: PhantomData,
        }
    }

    /// Swaps the factory of a node, keeping its index and all of its edges
    pub fn replace_node<T, F>(&mut self, node: &Node<T>, factory: F) -> Result<(), GraphError>
    where
        T: Injectable,
        F: Fn(&Resolver) -> Result<T, DynError> + Send + Sync + 'static,
    {
        let index = node.index();
        let descriptor = self
            .nodes
            .get_mut(index)
            .ok_or(GraphError::UnknownNode { index })?;

        tracing::debug!("Replacing factory of node #{index} ({})", descriptor.info);
        descriptor.factory = Arc::new(factory);
        Ok(())
    }

    /// A promise which resolves once a runtime graph built from this draw holds the node
    pub fn promise_of<T: Injectable>(&mut self, node: &Node<T>) -> PromiseOf<T> {
        let binding = Arc::new(PromiseBinding::default());
        self.promises.push(binding.clone());
        PromiseOf::new(binding, *node)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&NodeDescriptor> {
        self.nodes.get(index)
    }

    /// All nodes producing `T`, in declaration order
    pub fn find_nodes_by_type<T: Injectable>(&self) -> Vec<Node<T>> {
        let info = TypeInfo::of::<T>();
        self.nodes
            .iter()
            .filter(|node| node.info == info)
            .map(|node| Node::new(node.index))
            .collect()
    }

    /// The single node producing `T` with the given tag
    ///
    /// Returns `None` if there is no such node, or if it is ambiguous.
    pub fn find_node_by_type<T: Injectable>(&self, tag: Option<&str>) -> Option<Node<T>> {
        let info = TypeInfo::of::<T>();
        let mut matching = self
            .nodes
            .iter()
            .filter(|node| node.info == info && node.tag == tag);

        let found = matching.next()?;
        if matching.next().is_some() {
            tracing::debug!("Multiple nodes provide {info} with tag {tag:?}");
            return None;
        }
        Some(Node::new(found.index))
    }
}

impl fmt::Debug for GraphDraw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDraw")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Declares the edges and capabilities of a node before adding it to the draw
///
/// Forward edges are fixed by [NodeBuilder::build],
/// which also appends the reverse edges onto the nodes referenced.
#[must_use = "the node is only added to the draw by `build`"]
pub struct NodeBuilder<'draw, T> {
    draw: &'draw mut GraphDraw,
    factory: Arc<dyn DynFactory>,
    tag: Option<&'static str>,
    hooks: Hooks,
    dependencies: Vec<Edge>,
    interceptors: Vec<InterceptorEdge>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Injectable> NodeBuilder<'_, T> {
    /// The factory reads the given node
    ///
    /// Weak handles ([Node::weak]) only order construction, they don't propagate refreshes.
    ///
    /// # Panics
    /// If `node` is not registered in this draw. Nodes can only depend on nodes registered before them.
    pub fn depends_on<D>(mut self, node: &Node<D>) -> Self {
        self.check_registered(node.index());
        self.dependencies.push(Edge {
            index: node.index(),
            weak: node.is_weak(),
        });
        self
    }

    /// Chains the given interceptor around the instances of this node
    ///
    /// Interceptors apply in the order they are added.
    ///
    /// # Panics
    /// If `node` is not registered in this draw.
    pub fn intercepted_by<I: GraphInterceptor<T>>(mut self, node: &Node<I>) -> Self {
        self.check_registered(node.index());
        self.interceptors.push(InterceptorEdge {
            index: node.index(),
            info: TypeInfo::of::<I>(),
            init: capabilities::intercept_init::<I, T>,
            release: capabilities::intercept_release::<I, T>,
        });
        self
    }

    /// Disambiguates nodes of the same type
    pub fn tagged(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn build(self) -> Node<T> {
        let NodeBuilder {
            draw,
            factory,
            tag,
            hooks,
            dependencies,
            interceptors,
            ..
        } = self;

        let index = draw.nodes.len();
        for edge in &dependencies {
            draw.nodes[edge.index].dependents.push(Edge {
                index,
                weak: edge.weak,
            });
        }
        for edge in &interceptors {
            draw.nodes[edge.index].intercepts.push(index);
        }

        let info = factory.supplies();
        tracing::trace!(
            "Registered node #{index} ({info}) with {} dependencies and {} interceptors",
            dependencies.len(),
            interceptors.len()
        );

        draw.nodes.push(NodeDescriptor {
            index,
            info,
            tag,
            factory,
            hooks,
            dependencies,
            interceptors,
            dependents: Vec::new(),
            intercepts: Vec::new(),
        });

        Node::new(index)
    }

    fn check_registered(&self, index: usize) {
        assert!(
            index < self.draw.nodes.len(),
            "node #{index} is not registered in draw '{}'",
            self.draw.name
        );
    }
}

impl<T: Lifecycle> NodeBuilder<'_, T> {
    /// Calls [Lifecycle::init] after construction and [Lifecycle::release] on teardown
    pub fn with_lifecycle(mut self) -> Self {
        self.hooks.init = Some(capabilities::lifecycle_init::<T>);
        self.hooks.release = Some(capabilities::lifecycle_release::<T>);
        self
    }
}

impl<T: capabilities::Close> NodeBuilder<'_, T> {
    /// Calls [Close::close](capabilities::Close::close) on teardown
    pub fn with_close(mut self) -> Self {
        self.hooks.close = Some(capabilities::close::<T>);
        self
    }
}

impl<T: RefreshListener> NodeBuilder<'_, T> {
    /// Notifies the instance after every completed `init`/`refresh`
    pub fn with_refresh_listener(mut self) -> Self {
        self.hooks.refreshed = Some(capabilities::graph_refreshed::<T>);
        self
    }
}

impl<T: Injectable + PartialEq> NodeBuilder<'_, T> {
    /// A rebuilt instance equal to the previous one counts as unchanged
    ///
    /// Only honored with [ChangeDetection::IdentityOrEquality](crate::config::ChangeDetection::IdentityOrEquality).
    pub fn compare_eq(mut self) -> Self {
        self.hooks.eq = Some(capabilities::equals::<T>);
        self
    }
}
