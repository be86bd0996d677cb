use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;

use super::{Generation, GraphInner, Unit};
use crate::{
    errors::{GraphError, ReleaseError},
    node::NodeDescriptor,
    types::{DynError, Instance},
};

/// Tears down the instances of `members` held by `generation`
///
/// A node is only torn down once all of its dependents and the nodes it intercepts are.
/// Failures don't stop the teardown of other nodes, all of them are returned.
pub(crate) async fn teardown(
    graph: &Arc<GraphInner>,
    generation: Arc<Generation>,
    members: Vec<bool>,
) -> Vec<ReleaseError> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let nodes = graph.draw.nodes();
    let mut units: Vec<Option<Unit<()>>> = vec![None; nodes.len()];

    // Successors always have a higher index
    for index in (0..nodes.len()).rev() {
        if !members[index] {
            continue;
        }
        let Some(instance) = generation[index].clone() else {
            continue;
        };

        let waits: Vec<_> = nodes[index]
            .successors()
            .filter_map(|successor| units[successor].clone())
            .collect();

        let unit = {
            let graph = graph.clone();
            let generation = generation.clone();
            let errors = errors.clone();
            async move {
                join_all(waits).await;

                let node = &graph.draw.nodes()[index];
                let lookup = |index: usize| generation.get(index).cloned().flatten();
                match release_instance(node, instance, lookup) {
                    Ok(()) => tracing::trace!("Released node #{index} ({})", node.info),
                    Err(error) => errors.lock().push(ReleaseError {
                        index,
                        node: node.info,
                        error,
                    }),
                }
            }
        };
        units[index] = Some(graph.spawn_unit(index, unit));
    }

    join_all(units.into_iter().flatten()).await;

    let mut errors = std::mem::take(&mut *errors.lock());
    errors.sort_by_key(|error| error.index);
    errors
}

/// Runs the interceptor chain in reverse, then the lifecycle release and close hooks
pub(crate) fn release_instance(
    node: &NodeDescriptor,
    mut instance: Instance,
    lookup: impl Fn(usize) -> Option<Instance>,
) -> Result<(), DynError> {
    for edge in node.interceptors.iter().rev() {
        let interceptor = lookup(edge.index).ok_or(GraphError::NotInitialized {
            index: edge.index,
            type_name: edge.info.type_name,
        })?;
        instance = (edge.release)(&interceptor, instance)?;
    }

    if let Some(release) = node.hooks.release {
        release(&instance)?;
    }
    if let Some(close) = node.hooks.close {
        close(&instance)?;
    }

    Ok(())
}
