use std::time::Duration;

/// Tunables of a [RuntimeGraph](crate::runtime::RuntimeGraph)
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use wrapp_graph::config::{ChangeDetection, GraphConfig};
///
/// let config = GraphConfig::default()
///     .with_slow_node_threshold(Duration::from_millis(250))
///     .with_change_detection(ChangeDetection::Identity)
///     .with_worker_threads(2);
///
/// assert_eq!(config.worker_threads, Some(2));
/// ```
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Nodes taking longer than this to construct are logged as warnings
    pub slow_node_threshold: Duration,
    /// Decides when a rebuilt node counts as unchanged
    pub change_detection: ChangeDetection,
    /// Size of the default thread pool - `None` uses the host's parallelism
    pub worker_threads: Option<usize>,
    /// Name prefix for threads of the default thread pool
    pub thread_name_prefix: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            slow_node_threshold: Duration::from_secs(1),
            change_detection: ChangeDetection::default(),
            worker_threads: None,
            thread_name_prefix: "wrapp-graph-".to_string(),
        }
    }
}

impl GraphConfig {
    pub fn with_slow_node_threshold(mut self, threshold: Duration) -> Self {
        self.slow_node_threshold = threshold;
        self
    }

    pub fn with_change_detection(mut self, change_detection: ChangeDetection) -> Self {
        self.change_detection = change_detection;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = Some(worker_threads.max(1));
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Policy deciding whether a rebuilt node is "the same" as the instance it replaces
///
/// An unchanged node keeps its previous instance and stops the invalidation of its dependents.
/// A rebuild yielding the very same allocation is always unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeDetection {
    /// Unchanged only if the rebuild produced the very same allocation
    Identity,
    /// Unchanged if identical, or equal for nodes registered with [compare_eq](crate::draw::NodeBuilder::compare_eq)
    #[default]
    IdentityOrEquality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_threads_are_at_least_one() {
        let config = GraphConfig::default().with_worker_threads(0);
        assert_eq!(config.worker_threads, Some(1));
    }

    #[test]
    fn defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.change_detection, ChangeDetection::IdentityOrEquality);
        assert_eq!(config.slow_node_threshold, Duration::from_secs(1));
        assert_eq!(config.worker_threads, None);
    }
}
