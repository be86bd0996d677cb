//! Optional capabilities a component may support.
//!
//! Support is declared when the node is registered (see [NodeBuilder](crate::draw::NodeBuilder)),
//! the engine then calls the matching hook through a type erased function pointer.

use std::sync::Arc;

use crate::types::{DynError, Injectable, Instance};

/// Init/release pair invoked around construction and teardown
pub trait Lifecycle: Injectable {
    /// Called once the factory produced the instance, before any interceptor sees it
    fn init(&self) -> Result<(), DynError>;

    /// Called during teardown, after every interceptor released the instance
    fn release(&self) -> Result<(), DynError>;
}

/// Alternate teardown signal
pub trait Close: Injectable {
    fn close(&self) -> Result<(), DynError>;
}

/// Notified once per completed `init`/`refresh` of the graph the instance lives in
pub trait RefreshListener: Injectable {
    fn graph_refreshed(&self) -> Result<(), DynError>;
}

/// Construction/teardown hook chained around the instances of another node
///
/// For interceptors `[I1, .., In]` declared on a node
/// construction applies `I1.init` first and `In.init` last,
/// teardown applies `In.release` first and `I1.release` last.
pub trait GraphInterceptor<T: Injectable>: Injectable {
    fn init(&self, value: Arc<T>) -> Result<Arc<T>, DynError>;

    fn release(&self, value: Arc<T>) -> Result<Arc<T>, DynError>;
}

pub(crate) type HookFn = fn(&Instance) -> Result<(), DynError>;
pub(crate) type InterceptFn = fn(&Instance, Instance) -> Result<Instance, DynError>;
pub(crate) type EqFn = fn(&Instance, &Instance) -> bool;

/// Capabilities declared for a node
#[derive(Clone, Copy, Default)]
pub(crate) struct Hooks {
    pub init: Option<HookFn>,
    pub release: Option<HookFn>,
    pub close: Option<HookFn>,
    pub refreshed: Option<HookFn>,
    pub eq: Option<EqFn>,
}

pub(crate) fn lifecycle_init<T: Lifecycle>(instance: &Instance) -> Result<(), DynError> {
    instance.cast::<T>()?.init()
}

pub(crate) fn lifecycle_release<T: Lifecycle>(instance: &Instance) -> Result<(), DynError> {
    instance.cast::<T>()?.release()
}

pub(crate) fn close<T: Close>(instance: &Instance) -> Result<(), DynError> {
    instance.cast::<T>()?.close()
}

pub(crate) fn graph_refreshed<T: RefreshListener>(instance: &Instance) -> Result<(), DynError> {
    instance.cast::<T>()?.graph_refreshed()
}

pub(crate) fn equals<T: Injectable + PartialEq>(old: &Instance, new: &Instance) -> bool {
    match (old.downcast::<T>(), new.downcast::<T>()) {
        (Ok(old), Ok(new)) => old == new,
        _ => false,
    }
}

pub(crate) fn intercept_init<I, T>(interceptor: &Instance, value: Instance) -> Result<Instance, DynError>
where
    I: GraphInterceptor<T>,
    T: Injectable,
{
    let interceptor = interceptor.cast::<I>()?;
    interceptor.init(value.cast::<T>()?).map(Instance::from_arc)
}

pub(crate) fn intercept_release<I, T>(
    interceptor: &Instance,
    value: Instance,
) -> Result<Instance, DynError>
where
    I: GraphInterceptor<T>,
    T: Injectable,
{
    let interceptor = interceptor.cast::<I>()?;
    interceptor.release(value.cast::<T>()?).map(Instance::from_arc)
}
