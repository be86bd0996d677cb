use std::{
    any::{Any, TypeId},
    sync::Arc,
};

use crate::errors::GraphError;

/// Errors raised by component code (factories, hooks, interceptors)
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Nodes are constructed and torn down on a thread pool
/// So anything living in the graph needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Type erased object living in one slot of a generation
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub instance: Arc<dyn Any + Send + Sync + 'static>,
}

impl Instance {
    pub(crate) fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub(crate) fn from_arc<T: Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance,
        }
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.instance.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.info.type_name),
        }
    }

    /// Like [Instance::downcast] but reports a [GraphError]
    pub fn cast<T: Injectable>(&self) -> Result<Arc<T>, GraphError> {
        self.downcast()
            .map_err(|actual_type| GraphError::DowncastFailed {
                required_type: std::any::type_name::<T>(),
                actual_type,
            })
    }

    /// True if both point to the very same allocation
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        // Data pointers only - vtable pointers are not unique
        std::ptr::addr_eq(Arc::as_ptr(&self.instance), Arc::as_ptr(&other.instance))
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_eq_tracks_allocation_not_value() {
        let a = Instance::new(String::from("same"));
        let b = Instance::new(String::from("same"));

        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn cast_reports_both_types() {
        let instance = Instance::new(5_u32);

        assert_eq!(*instance.cast::<u32>().unwrap(), 5);
        match instance.cast::<String>() {
            Err(GraphError::DowncastFailed {
                required_type,
                actual_type,
            }) => {
                assert_eq!(required_type, std::any::type_name::<String>());
                assert_eq!(actual_type, "u32");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
