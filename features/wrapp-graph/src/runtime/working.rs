//! Working snapshot of one `init` or `refresh`.
//!
//! A transition schedules one construction unit per node, in index order.
//! Each unit waits for the units of its dependencies and interceptors and then either
//! - reuses the previous instance, if no predecessor it depends on strongly has changed, or
//! - runs the factory, the lifecycle init hook and the interceptor chain.
//!
//! Whether a node has to be rebuilt is tracked with one counter per node.
//! Before scheduling, a reachability pass starting at the roots counts every invalidating edge
//! (strong dependents and intercepted nodes) pointing at a node.
//! A unit which ends up unchanged decrements the counters of the nodes it invalidates,
//! so a node whose counter dropped back to zero saw only unchanged predecessors.
//! Nodes the pass never reaches are frozen: they keep their instance and get no unit at all.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use parking_lot::Mutex;

use super::{teardown, Generation, Graph, GraphInner, Unit};
use crate::{
    accessor::{PromiseBinding, PromiseOf, ValueOf},
    config::ChangeDetection,
    draw::GraphDraw,
    errors::{GraphError, TransitionError},
    node::{Node, NodeDescriptor},
    types::{DynError, Injectable, Instance},
};

/// Counter value of nodes outside of the transition
const FROZEN: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Changed,
    Unchanged,
}

/// Only [UnitError::Failed] has a real error attached, stored in [Working::failures]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitError {
    Failed,
    PredecessorFailed,
}

pub(crate) type UnitResult = Result<Outcome, UnitError>;

pub(crate) struct Working {
    graph: Arc<GraphInner>,
    previous: Arc<Generation>,
    slots: Vec<OnceLock<Instance>>,
    roots: Vec<bool>,
    pending: Vec<AtomicUsize>,
    rebuilt: Vec<AtomicBool>,
    /// The first entry is the cause of the failed transition
    failures: Mutex<Vec<DynError>>,
}

impl Working {
    /// Every node is a root
    pub(crate) fn for_init(graph: Arc<GraphInner>, previous: Arc<Generation>) -> Self {
        let size = graph.draw.len();
        Self::new(graph, previous, vec![true; size], vec![0; size])
    }

    /// Only `root` and what it transitively invalidates take part
    pub(crate) fn for_refresh(
        graph: Arc<GraphInner>,
        previous: Arc<Generation>,
        root: usize,
    ) -> Self {
        let nodes = graph.draw.nodes();
        let mut visited = vec![false; nodes.len()];
        let mut pending = vec![0; nodes.len()];
        let mut queue = VecDeque::from([root]);
        visited[root] = true;

        while let Some(index) = queue.pop_front() {
            for next in nodes[index].invalidates() {
                pending[next] += 1;
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        for (count, visited) in pending.iter_mut().zip(&visited) {
            if !visited {
                *count = FROZEN;
            }
        }

        let mut roots = vec![false; nodes.len()];
        roots[root] = true;
        Self::new(graph, previous, roots, pending)
    }

    fn new(
        graph: Arc<GraphInner>,
        previous: Arc<Generation>,
        roots: Vec<bool>,
        pending: Vec<usize>,
    ) -> Self {
        let slots = pending
            .iter()
            .zip(previous.iter())
            .map(|(count, previous)| {
                let slot = OnceLock::new();
                if let (FROZEN, Some(instance)) = (*count, previous) {
                    let _ = slot.set(instance.clone());
                }
                slot
            })
            .collect();

        Working {
            rebuilt: pending.iter().map(|_| AtomicBool::new(false)).collect(),
            pending: pending.into_iter().map(AtomicUsize::new).collect(),
            graph,
            previous,
            slots,
            roots,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Runs every unit to completion
    ///
    /// Returns the new generation, or the error of the first unit which genuinely failed.
    pub(crate) async fn execute(self: Arc<Self>) -> Result<Generation, TransitionError> {
        let size = self.slots.len();
        let mut units: Vec<Option<Unit<UnitResult>>> = Vec::with_capacity(size);

        for index in 0..size {
            if self.is_frozen(index) {
                units.push(None);
                continue;
            }

            let waits: Vec<_> = self.graph.draw.nodes()[index]
                .predecessors()
                .filter_map(|predecessor| units[predecessor].clone())
                .collect();

            let this = self.clone();
            let unit = self
                .graph
                .spawn_unit(index, async move { this.construct(index, waits).await });
            units.push(Some(unit));
        }

        let scheduled: Vec<(usize, Unit<UnitResult>)> = units
            .into_iter()
            .enumerate()
            .filter_map(|(index, unit)| unit.map(|unit| (index, unit)))
            .collect();

        tracing::trace!("Waiting for {} units", scheduled.len());
        let results = join_all(scheduled.iter().map(|(_, unit)| unit.clone())).await;

        // A unit whose channel closed never reported - it was cancelled
        let cancelled: Vec<usize> = scheduled
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_err())
            .map(|((index, _), _)| *index)
            .collect();
        for index in &cancelled {
            tracing::warn!(
                "Construction of node #{index} ({}) was cancelled",
                self.graph.draw.nodes()[*index].info
            );
        }

        let mut failures = std::mem::take(&mut *self.failures.lock());
        if !failures.is_empty() {
            let cause = failures.remove(0);
            return Err(TransitionError::new(cause, failures));
        }

        if let Some(&index) = cancelled.first() {
            let type_name = self.graph.draw.nodes()[index].info.type_name;
            return Err(GraphError::Cancelled { index, type_name }.into());
        }

        Ok(self.generation())
    }

    async fn construct(self: Arc<Self>, index: usize, waits: Vec<Unit<UnitResult>>) -> UnitResult {
        for result in join_all(waits).await {
            if !matches!(result, Ok(Ok(_))) {
                return Err(UnitError::PredecessorFailed);
            }
        }

        let node = &self.graph.draw.nodes()[index];
        let previous = self.previous[index].as_ref();

        if let Some(previous) = previous.filter(|_| self.can_reuse(index)) {
            tracing::trace!("Node #{index} ({}) is unchanged", node.info);
            self.keep(index, previous.clone());
            return Ok(Outcome::Unchanged);
        }

        let started = Instant::now();
        let instance = match self.build(node) {
            Ok(instance) => instance,
            Err(error) => {
                tracing::debug!("Node #{index} ({}) failed: {error}", node.info);
                self.failures.lock().push(error);
                return Err(UnitError::Failed);
            }
        };
        self.log_duration(node, started.elapsed());

        match previous {
            Some(previous) if self.is_unchanged(node, previous, &instance) => {
                if !previous.ptr_eq(&instance) {
                    // Equal but distinct, the previous instance stays
                    let discarded =
                        teardown::release_instance(node, instance, |index| self.slot(index));
                    if let Err(error) = discarded {
                        tracing::warn!(
                            "Failed to release duplicate of node #{index} ({}): {error}",
                            node.info
                        );
                    }
                }
                tracing::trace!("Node #{index} ({}) was rebuilt unchanged", node.info);
                self.keep(index, previous.clone());
                Ok(Outcome::Unchanged)
            }
            _ => {
                let _ = self.slots[index].set(instance);
                self.rebuilt[index].store(true, Ordering::Release);
                if node.has_refresh_listener() {
                    self.graph.listeners.lock().insert(index);
                }
                Ok(Outcome::Changed)
            }
        }
    }

    fn build(self: &Arc<Self>, node: &NodeDescriptor) -> Result<Instance, DynError> {
        let resolver = Resolver {
            working: self.clone(),
            index: node.index,
        };

        let mut instance = node.factory.construct(&resolver)?;
        if let Some(init) = node.hooks.init {
            init(&instance)?;
        }

        for edge in &node.interceptors {
            let interceptor = self
                .slot(edge.index)
                .ok_or_else(|| self.not_initialized(edge.index))?;
            instance = (edge.init)(&interceptor, instance)?;
        }

        Ok(instance)
    }

    fn is_frozen(&self, index: usize) -> bool {
        self.pending[index].load(Ordering::Acquire) == FROZEN
    }

    /// Called once every predecessor finished
    fn can_reuse(&self, index: usize) -> bool {
        !self.roots[index] && self.pending[index].load(Ordering::Acquire) == 0
    }

    fn is_unchanged(&self, node: &NodeDescriptor, previous: &Instance, instance: &Instance) -> bool {
        if previous.ptr_eq(instance) {
            return true;
        }

        // Equal values wrapped by a rebuilt interceptor still differ
        let rewrapped = node
            .interceptors
            .iter()
            .any(|edge| self.rebuilt[edge.index].load(Ordering::Acquire));
        if rewrapped {
            return false;
        }

        match self.graph.config.change_detection {
            ChangeDetection::Identity => false,
            ChangeDetection::IdentityOrEquality => {
                node.hooks.eq.is_some_and(|eq| eq(previous, instance))
            }
        }
    }

    fn keep(&self, index: usize, instance: Instance) {
        let _ = self.slots[index].set(instance);

        for next in self.graph.draw.nodes()[index].invalidates() {
            let _ = self.pending[next].fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                match count {
                    FROZEN | 0 => None,
                    count => Some(count - 1),
                }
            });
        }
    }

    fn log_duration(&self, node: &NodeDescriptor, elapsed: Duration) {
        if elapsed >= self.graph.config.slow_node_threshold {
            tracing::warn!(
                "Node #{} ({}) took {elapsed:?} to construct",
                node.index,
                node.info
            );
        } else {
            tracing::trace!("Constructed node #{} ({}) in {elapsed:?}", node.index, node.info);
        }
    }

    fn not_initialized(&self, index: usize) -> GraphError {
        GraphError::NotInitialized {
            index,
            type_name: self.graph.draw.nodes()[index].info.type_name,
        }
    }

    pub(crate) fn slot(&self, index: usize) -> Option<Instance> {
        self.slots.get(index)?.get().cloned()
    }

    pub(crate) fn generation(&self) -> Generation {
        self.slots.iter().map(|slot| slot.get().cloned()).collect()
    }

    pub(crate) fn previous(&self) -> &Arc<Generation> {
        &self.previous
    }

    /// Nodes holding a freshly constructed instance
    pub(crate) fn rebuilt(&self) -> Vec<bool> {
        self.rebuilt
            .iter()
            .map(|rebuilt| rebuilt.load(Ordering::Acquire))
            .collect()
    }
}

/// A factory's view of the graph
///
/// Reads go to the generation under construction,
/// dependencies declared on the node are always available.
pub struct Resolver {
    working: Arc<Working>,
    index: usize,
}

impl Resolver {
    /// The node being constructed
    pub fn node(&self) -> &NodeDescriptor {
        &self.draw().nodes()[self.index]
    }

    pub fn draw(&self) -> &GraphDraw {
        &self.working.graph.draw
    }

    pub fn get<T: Injectable>(&self, node: &Node<T>) -> Result<Arc<T>, GraphError> {
        self.instance(node.index())?.cast()
    }

    pub fn instance(&self, index: usize) -> Result<Instance, GraphError> {
        if index >= self.draw().len() {
            return Err(GraphError::UnknownNode { index });
        }
        self.working
            .slot(index)
            .ok_or_else(|| self.working.not_initialized(index))
    }

    /// A live binding which follows all future refreshes
    pub fn value_of<T: Injectable>(&self, node: &Node<T>) -> ValueOf<T> {
        ValueOf::new(Arc::downgrade(&self.working.graph), *node)
    }

    pub fn promise_of<T: Injectable>(&self, node: &Node<T>) -> PromiseOf<T> {
        let binding = PromiseBinding::bound(Arc::downgrade(&self.working.graph));
        PromiseOf::new(Arc::new(binding), *node)
    }
}

impl Graph for Resolver {
    fn draw(&self) -> &GraphDraw {
        Resolver::draw(self)
    }

    fn instance(&self, index: usize) -> Result<Instance, GraphError> {
        Resolver::instance(self, index)
    }

    fn value_of<T: Injectable>(&self, node: &Node<T>) -> ValueOf<T> {
        Resolver::value_of(self, node)
    }

    fn promise_of<T: Injectable>(&self, node: &Node<T>) -> PromiseOf<T> {
        Resolver::promise_of(self, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{draw::GraphDraw, runtime::RuntimeGraph};

    fn pending(working: &Working) -> Vec<usize> {
        working
            .pending
            .iter()
            .map(|count| count.load(Ordering::Acquire))
            .collect()
    }

    /// a ← b ← c, a ← c, c ←(weak) d, e standalone
    fn diamond() -> RuntimeGraph {
        let mut draw = GraphDraw::new("counts");
        let a = draw.add_instance(1_u8).build();
        let b = draw.add_instance(2_u8).depends_on(&a).build();
        let c = draw
            .add_instance(3_u8)
            .depends_on(&a)
            .depends_on(&b)
            .build();
        draw.add_instance(4_u8).depends_on(&c.weak()).build();
        draw.add_instance(5_u8).build();
        RuntimeGraph::new(draw).unwrap()
    }

    #[test]
    fn refresh_counts_invalidating_edges() {
        let graph = diamond();
        let previous = Arc::new(vec![Some(Instance::new(0_u8)); 5]);

        let working = Working::for_refresh(graph.inner.clone(), previous, 0);

        assert_eq!(pending(&working), vec![0, 1, 2, FROZEN, FROZEN]);
        // Frozen nodes keep their instance without running
        assert!(working.slot(3).is_some());
        assert!(working.slot(1).is_none());
    }

    #[test]
    fn unchanged_nodes_release_their_dependents() {
        let graph = diamond();
        let previous = Arc::new(vec![Some(Instance::new(0_u8)); 5]);
        let working = Working::for_refresh(graph.inner.clone(), previous, 0);

        working.keep(0, Instance::new(1_u8));
        assert_eq!(pending(&working), vec![0, 0, 1, FROZEN, FROZEN]);
        assert!(working.can_reuse(1));
        assert!(!working.can_reuse(2));
        // Roots are always rebuilt
        assert!(!working.can_reuse(0));

        working.keep(1, Instance::new(2_u8));
        assert!(working.can_reuse(2));
    }

    #[test]
    fn init_rebuilds_every_node() {
        let graph = diamond();
        let working = Working::for_init(graph.inner.clone(), Arc::new(vec![None; 5]));

        assert_eq!(pending(&working), vec![0; 5]);
        assert!((0..5).all(|index| !working.can_reuse(index)));
    }
}
