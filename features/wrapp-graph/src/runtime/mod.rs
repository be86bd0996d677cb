//! The live, materialized instance of a [GraphDraw].
//!
//! A [RuntimeGraph] owns one array of object slots, indexed by node index.
//! The array is never mutated - `init` and `refresh` build a complete new generation
//! and publish it with a single atomic swap, so readers see either the old or the new generation.
//!
//! Structural transitions (`init`, `refresh`, `release`) are serialized by a single permit.
//! Internally every node is constructed (and torn down) by its own unit on the thread pool,
//! ordered only by units awaiting the units of their predecessors.

use std::{
    collections::BTreeSet,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Instant,
};

use arc_swap::ArcSwap;
use futures::{
    executor::{block_on, ThreadPool},
    future::Shared,
    task::{Spawn, SpawnExt},
    FutureExt,
};
use futures_channel::oneshot;
use parking_lot::Mutex;

use crate::{
    accessor::{PromiseBinding, PromiseOf, ValueOf},
    config::GraphConfig,
    draw::GraphDraw,
    errors::{GraphError, ReleaseErrors, TransitionError},
    node::Node,
    types::{Injectable, Instance},
};

mod teardown;
pub(crate) mod working;

pub use working::Resolver;
use working::Working;

/// One object slot per node - `None` when the node is not initialized
pub(crate) type Generation = Vec<Option<Instance>>;

/// Completion of a unit, awaitable by any number of other units
///
/// Resolves to `Err(Canceled)` if the unit ended without reporting.
pub(crate) type Unit<T> = Shared<oneshot::Receiver<T>>;

/// Read access to a graph
///
/// Implemented by [RuntimeGraph] for component code,
/// and by [Resolver] for factories reading the generation under construction.
pub trait Graph {
    fn draw(&self) -> &GraphDraw;

    /// The type erased instance in the slot of `index`
    fn instance(&self, index: usize) -> Result<Instance, GraphError>;

    fn value_of<T: Injectable>(&self, node: &Node<T>) -> ValueOf<T>
    where
        Self: Sized;

    fn promise_of<T: Injectable>(&self, node: &Node<T>) -> PromiseOf<T>
    where
        Self: Sized;

    fn get<T: Injectable>(&self, node: &Node<T>) -> Result<Arc<T>, GraphError>
    where
        Self: Sized,
    {
        self.instance(node.index())?.cast()
    }
}

/// Engine materializing a [GraphDraw]
///
/// # Example
/// ```rust
/// use wrapp_graph::{draw::GraphDraw, runtime::RuntimeGraph};
///
/// let mut draw = GraphDraw::new("app");
/// let greeting = draw.add_instance("hello").build();
/// let shout = draw
///     .add_node(move |graph| Ok(graph.get(&greeting)?.to_uppercase()))
///     .depends_on(&greeting)
///     .build();
///
/// let graph = RuntimeGraph::new(draw).unwrap();
/// graph.init().unwrap();
/// assert_eq!(*graph.get(&shout).unwrap(), "HELLO");
/// graph.release().unwrap();
/// ```
#[derive(Clone)]
pub struct RuntimeGraph {
    inner: Arc<GraphInner>,
}

impl RuntimeGraph {
    pub fn builder(draw: GraphDraw) -> RuntimeGraphBuilder {
        RuntimeGraphBuilder {
            draw,
            config: GraphConfig::default(),
            spawner: None,
        }
    }

    /// Creates the graph with the default config and thread pool
    pub fn new(draw: GraphDraw) -> Result<Self, GraphError> {
        Self::builder(draw).build()
    }

    /// Materializes every node
    ///
    /// On failure nothing published changes, the error is the one raised by the failing component.
    pub fn init(&self) -> Result<(), TransitionError> {
        self.inner.init()
    }

    /// Rebuilds the node and everything it transitively invalidates
    pub fn refresh<T>(&self, node: &Node<T>) -> Result<(), TransitionError> {
        self.inner.refresh(node.index())
    }

    /// Tears down every initialized node, dependents first
    pub fn release(&self) -> Result<(), ReleaseErrors> {
        self.inner.release()
    }

    pub fn get<T: Injectable>(&self, node: &Node<T>) -> Result<Arc<T>, GraphError> {
        self.inner.instance(node.index())?.cast()
    }

    pub fn value_of<T: Injectable>(&self, node: &Node<T>) -> ValueOf<T> {
        ValueOf::new(Arc::downgrade(&self.inner), *node)
    }

    pub fn promise_of<T: Injectable>(&self, node: &Node<T>) -> PromiseOf<T> {
        let binding = PromiseBinding::bound(Arc::downgrade(&self.inner));
        PromiseOf::new(Arc::new(binding), *node)
    }

    pub fn draw(&self) -> &GraphDraw {
        &self.inner.draw
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }
}

impl Graph for RuntimeGraph {
    fn draw(&self) -> &GraphDraw {
        RuntimeGraph::draw(self)
    }

    fn instance(&self, index: usize) -> Result<Instance, GraphError> {
        self.inner.instance(index)
    }

    fn value_of<T: Injectable>(&self, node: &Node<T>) -> ValueOf<T> {
        RuntimeGraph::value_of(self, node)
    }

    fn promise_of<T: Injectable>(&self, node: &Node<T>) -> PromiseOf<T> {
        RuntimeGraph::promise_of(self, node)
    }
}

impl fmt::Debug for RuntimeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let objects = self.inner.objects.load();
        let mut map = f.debug_struct("RuntimeGraph");
        for (node, slot) in self.inner.draw.nodes().iter().zip(objects.iter()) {
            let val = if slot.is_some() { "ready" } else { "empty" };
            map.field(node.info.type_name, &val);
        }
        map.finish()
    }
}

pub struct RuntimeGraphBuilder {
    draw: GraphDraw,
    config: GraphConfig,
    spawner: Option<Arc<dyn Spawn + Send + Sync>>,
}

impl RuntimeGraphBuilder {
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs construction and teardown units on the given executor instead of a new thread pool
    pub fn spawner(mut self, spawner: impl Spawn + Send + Sync + 'static) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    pub fn build(self) -> Result<RuntimeGraph, GraphError> {
        let RuntimeGraphBuilder {
            draw,
            config,
            spawner,
        } = self;

        let spawner: Arc<dyn Spawn + Send + Sync> = match spawner {
            Some(spawner) => spawner,
            None => Arc::new(default_pool(&config)?),
        };

        let size = draw.len();
        let inner = Arc::new(GraphInner {
            objects: ArcSwap::from_pointee(vec![None; size]),
            transition: Mutex::new(()),
            listeners: Mutex::new(BTreeSet::new()),
            spawner,
            config,
            draw,
        });

        for promise in &inner.draw.promises {
            promise.bind(Arc::downgrade(&inner));
        }

        tracing::debug!(
            "Created runtime graph '{}' with {size} nodes",
            inner.draw.name()
        );
        Ok(RuntimeGraph { inner })
    }
}

fn default_pool(config: &GraphConfig) -> std::io::Result<ThreadPool> {
    let mut builder = ThreadPool::builder();
    builder.name_prefix(config.thread_name_prefix.clone());
    if let Some(threads) = config.worker_threads {
        builder.pool_size(threads.max(1));
    }
    builder.create()
}

pub(crate) struct GraphInner {
    pub(crate) draw: GraphDraw,
    pub(crate) config: GraphConfig,
    /// The published generation
    objects: ArcSwap<Generation>,
    /// Single permit for init, refresh and release
    transition: Mutex<()>,
    /// Nodes whose instances want to be notified after a refresh
    pub(crate) listeners: Mutex<BTreeSet<usize>>,
    spawner: Arc<dyn Spawn + Send + Sync>,
}

impl GraphInner {
    pub(crate) fn instance(&self, index: usize) -> Result<Instance, GraphError> {
        let objects = self.objects.load();
        match objects.get(index) {
            Some(Some(instance)) => Ok(instance.clone()),
            Some(None) => Err(GraphError::NotInitialized {
                index,
                type_name: self.draw.nodes()[index].info.type_name,
            }),
            None => Err(GraphError::UnknownNode { index }),
        }
    }

    pub(crate) fn init(self: &Arc<Self>) -> Result<(), TransitionError> {
        let _transition = self.transition.lock();
        let started = Instant::now();
        tracing::debug!(
            "Initializing graph '{}' with {} nodes",
            self.draw.name(),
            self.draw.len()
        );

        let working = Working::for_init(self.clone(), self.objects.load_full());
        self.run(working)?;

        tracing::info!(
            "Graph '{}' initialized in {:?}",
            self.draw.name(),
            started.elapsed()
        );
        Ok(())
    }

    pub(crate) fn refresh(self: &Arc<Self>, index: usize) -> Result<(), TransitionError> {
        let _transition = self.transition.lock();
        let started = Instant::now();

        let previous = self.objects.load_full();
        let node = self.draw.node(index).ok_or(GraphError::UnknownNode { index })?;
        if previous[index].is_none() {
            return Err(GraphError::NotInitialized {
                index,
                type_name: node.info.type_name,
            }
            .into());
        }

        tracing::debug!(
            "Refreshing node #{index} ({}) of graph '{}'",
            node.info,
            self.draw.name()
        );
        self.run(Working::for_refresh(self.clone(), previous, index))?;

        tracing::debug!(
            "Refreshed node #{index} ({}) in {:?}",
            node.info,
            started.elapsed()
        );
        Ok(())
    }

    pub(crate) fn release(self: &Arc<Self>) -> Result<(), ReleaseErrors> {
        let _transition = self.transition.lock();
        let started = Instant::now();
        tracing::debug!("Releasing graph '{}'", self.draw.name());

        let current = self.objects.load_full();
        let members = current.iter().map(Option::is_some).collect();
        let errors = block_on(teardown::teardown(self, current, members));

        self.objects.store(Arc::new(vec![None; self.draw.len()]));
        self.listeners.lock().clear();

        if !errors.is_empty() {
            return Err(ReleaseErrors { errors });
        }

        tracing::info!(
            "Graph '{}' released in {:?}",
            self.draw.name(),
            started.elapsed()
        );
        Ok(())
    }

    /// Builds the working generation, publishes it and tears down what it superseded
    fn run(self: &Arc<Self>, working: Working) -> Result<(), TransitionError> {
        let working = Arc::new(working);
        let result = block_on(working.clone().execute());

        let rebuilt = working.rebuilt();
        let previous = working.previous().clone();

        let generation = match result {
            Ok(generation) => generation,
            Err(mut error) => {
                tracing::debug!("Rolling back graph '{}': {error}", self.draw.name());
                let built = Arc::new(working.generation());
                let rollback = block_on(teardown::teardown(self, built, rebuilt.clone()));
                error.suppress(rollback);

                let mut listeners = self.listeners.lock();
                for (index, rebuilt) in rebuilt.iter().enumerate() {
                    if *rebuilt && previous[index].is_none() {
                        listeners.remove(&index);
                    }
                }
                return Err(error);
            }
        };

        self.objects.store(Arc::new(generation));
        self.notify_listeners();

        let superseded = rebuilt
            .iter()
            .zip(previous.iter())
            .map(|(rebuilt, previous)| *rebuilt && previous.is_some())
            .collect();
        for error in block_on(teardown::teardown(self, previous, superseded)) {
            tracing::warn!("Failed to tear down superseded instance: {error}");
        }

        Ok(())
    }

    fn notify_listeners(&self) {
        let listeners: Vec<usize> = self.listeners.lock().iter().copied().collect();
        let objects = self.objects.load();

        for index in listeners {
            let node = &self.draw.nodes()[index];
            let (Some(refreshed), Some(Some(instance))) = (node.hooks.refreshed, objects.get(index))
            else {
                continue;
            };

            if let Err(error) = refreshed(instance) {
                tracing::warn!(
                    "Refresh listener of node #{index} ({}) failed: {error}",
                    node.info
                );
            }
        }
    }

    /// Runs `unit` on the thread pool
    ///
    /// A panicking unit never reports, which awaiting units observe as cancellation.
    pub(crate) fn spawn_unit<T, F>(&self, index: usize, unit: F) -> Unit<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = async move {
            // The unit is dropped before reporting, releasing everything it captured
            let result = AssertUnwindSafe(unit).catch_unwind().await;
            match result {
                Ok(result) => {
                    let _ = tx.send(result);
                }
                Err(_) => tracing::error!("Unit of node #{index} panicked"),
            }
        };

        if let Err(error) = self.spawner.spawn(task) {
            tracing::error!("Failed to spawn unit of node #{index}: {error}");
        }

        rx.shared()
    }
}
