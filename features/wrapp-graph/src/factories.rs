use std::sync::Arc;

use crate::{
    runtime::working::Resolver,
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// A Factory providing instances of a given type
///
/// Implemented for any `Fn(&Resolver) -> Result<T, DynError>`.
pub trait InstanceFactory: Send + Sync + 'static {
    type Provides: Injectable;

    /// Returns the typeinfo about the factory's provided type
    fn supplies() -> TypeInfo {
        TypeInfo::of::<Self::Provides>()
    }

    /// Constructs a new instance of the factory's provided type
    ///
    /// Dependencies are read from the resolver, which only exposes the generation under construction.
    fn construct(&self, graph: &Resolver) -> Result<Self::Provides, DynError>;
}

impl<T, F> InstanceFactory for F
where
    T: Injectable,
    F: Fn(&Resolver) -> Result<T, DynError> + Send + Sync + 'static,
{
    type Provides = T;

    fn construct(&self, graph: &Resolver) -> Result<T, DynError> {
        self(graph)
    }
}

/// Wrapper Trait for factories, providing instances of Any
pub(crate) trait DynFactory: Send + Sync {
    fn supplies(&self) -> TypeInfo;

    /// Constructs a new instance of the factory's provided type
    fn construct(&self, graph: &Resolver) -> Result<Instance, DynError>;
}
// Impl DynFactory for any InstanceFactory
impl<SpecificFactory: InstanceFactory> DynFactory for SpecificFactory {
    fn supplies(&self) -> TypeInfo {
        SpecificFactory::supplies()
    }

    fn construct(&self, graph: &Resolver) -> Result<Instance, DynError> {
        // Forward the call to the specific implementation
        InstanceFactory::construct(self, graph).map(Instance::new)
    }
}

/// Hands out the same allocation on every construction
///
/// Rebuilding such a node is always detected as unchanged.
pub(crate) struct ExistingInstance<T>(pub Arc<T>);

impl<T: Injectable> DynFactory for ExistingInstance<T> {
    fn supplies(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn construct(&self, _graph: &Resolver) -> Result<Instance, DynError> {
        Ok(Instance::from_arc(self.0.clone()))
    }
}
