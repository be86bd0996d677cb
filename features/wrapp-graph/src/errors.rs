use std::{error::Error, fmt};

use thiserror::Error;

use crate::types::{DynError, TypeInfo};

/// Errors raised by the engine itself
#[derive(Error, Debug)]
pub enum GraphError {
    /// The slot of the node is empty
    #[error("Node #{index} ('{type_name}') is not initialized")]
    NotInitialized {
        index: usize,
        type_name: &'static str,
    },
    /// The node handle does not point into this graph
    #[error("Node #{index} does not exist in this graph")]
    UnknownNode { index: usize },

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
    /// A construction unit ended without producing a result
    #[error("Construction of node #{index} ('{type_name}') was cancelled")]
    Cancelled {
        index: usize,
        type_name: &'static str,
    },
    /// A live binding outlived its graph
    #[error("The runtime graph was dropped")]
    GraphDropped,
    /// The default thread pool could not be started
    #[error("Failed to start the graph executor: {0}")]
    Executor(#[from] std::io::Error),
}

/// Failure of `init` or `refresh`
///
/// Carries the original error of the failing component untouched.
/// `Display` and `source` are forwarded to it, so callers observe exactly what the component raised.
/// Secondary failures (other components failing concurrently, rollback teardown) are kept as suppressed.
pub struct TransitionError {
    cause: DynError,
    suppressed: Vec<DynError>,
}

impl TransitionError {
    pub(crate) fn new(cause: DynError, suppressed: Vec<DynError>) -> Self {
        Self { cause, suppressed }
    }

    /// The original error
    pub fn cause(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn into_cause(self) -> DynError {
        self.cause
    }

    /// Errors that happened after the original one, e.g. while rolling back
    pub fn suppressed(&self) -> &[DynError] {
        &self.suppressed
    }

    pub(crate) fn suppress<E>(&mut self, errors: impl IntoIterator<Item = E>)
    where
        E: Into<DynError>,
    {
        self.suppressed.extend(errors.into_iter().map(Into::into));
    }

    pub fn is<E: Error + 'static>(&self) -> bool {
        self.cause.is::<E>()
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref()
    }
}

impl From<GraphError> for TransitionError {
    fn from(error: GraphError) -> Self {
        Self::new(Box::new(error), Vec::new())
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl fmt::Debug for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionError")
            .field("cause", &self.cause)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl Error for TransitionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.source()
    }
}

/// Teardown failure of a single node
#[derive(Error, Debug)]
#[error("Releasing node #{index} ('{node}') failed - error: {error}")]
pub struct ReleaseError {
    pub index: usize,
    pub node: TypeInfo,
    #[source]
    pub error: DynError,
}

/// All teardown failures collected during `release`
#[derive(Error, Debug)]
pub struct ReleaseErrors {
    pub errors: Vec<ReleaseError>,
}
impl fmt::Display for ReleaseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut display = Vec::new();
        display.push("Releasing the graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn transition_error_is_transparent() {
        let error = TransitionError::new(Box::new(Boom), vec!["late".into()]);

        assert_eq!(error.to_string(), "boom");
        assert!(error.is::<Boom>());
        assert!(error.downcast_ref::<Boom>().is_some());
        assert_eq!(error.suppressed().len(), 1);
        assert!(error.into_cause().downcast::<Boom>().is_ok());
    }

    #[test]
    fn release_errors_list_every_node() {
        let errors = ReleaseErrors {
            errors: vec![
                ReleaseError {
                    index: 0,
                    node: TypeInfo::of::<u8>(),
                    error: "first".into(),
                },
                ReleaseError {
                    index: 3,
                    node: TypeInfo::of::<u16>(),
                    error: "second".into(),
                },
            ],
        };

        let message = errors.to_string();
        assert!(message.contains("- Releasing node #0 ('u8') failed - error: first"));
        assert!(message.contains("- Releasing node #3 ('u16') failed - error: second"));
    }
}
