//! Components shared by the integration tests.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use parking_lot::Mutex;
use thiserror::Error;
use wrapp_graph::{DynError, GraphInterceptor, Lifecycle};

/// Ordered log of everything the components observed, shared across threads
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Returns and clears the log
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn position(&self, event: &str) -> usize {
        let events = self.snapshot();
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event '{event}' missing in {events:?}"))
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == event).count()
    }

    /// All events starting with `prefix`, in order
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// Shared mutable input of a factory
#[derive(Clone, Default)]
pub struct Knob(Arc<AtomicU32>);

impl Knob {
    pub fn new(value: u32) -> Self {
        Knob(Arc::new(AtomicU32::new(value)))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: u32) {
        self.0.store(value, Ordering::SeqCst)
    }

    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Component logging its lifecycle as `init:{name}#{version}` / `release:{name}#{version}`
pub struct Tracked {
    pub name: &'static str,
    pub version: u32,
    pub events: Events,
}

impl Tracked {
    pub fn new(name: &'static str, version: u32, events: &Events) -> Self {
        events.push(format!("build:{name}#{version}"));
        Tracked {
            name,
            version,
            events: events.clone(),
        }
    }
}

impl Lifecycle for Tracked {
    fn init(&self) -> Result<(), DynError> {
        self.events
            .push(format!("init:{}#{}", self.name, self.version));
        Ok(())
    }

    fn release(&self) -> Result<(), DynError> {
        self.events
            .push(format!("release:{}#{}", self.name, self.version));
        Ok(())
    }
}

/// Equality only looks at `value`, `serial` tells allocations apart
pub struct Versioned {
    pub value: u32,
    pub serial: u32,
    pub events: Events,
}

impl PartialEq for Versioned {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Lifecycle for Versioned {
    fn init(&self) -> Result<(), DynError> {
        Ok(())
    }

    fn release(&self) -> Result<(), DynError> {
        self.events.push(format!("release:versioned#{}", self.serial));
        Ok(())
    }
}

/// Interceptor appending its name to the label of the intercepted value
pub struct Labeler {
    pub name: &'static str,
    pub events: Events,
}

pub struct Labeled {
    pub label: String,
}

impl GraphInterceptor<Labeled> for Labeler {
    fn init(&self, value: Arc<Labeled>) -> Result<Arc<Labeled>, DynError> {
        self.events.push(format!("intercept-init:{}", self.name));
        Ok(Arc::new(Labeled {
            label: format!("{}+{}", value.label, self.name),
        }))
    }

    fn release(&self, value: Arc<Labeled>) -> Result<Arc<Labeled>, DynError> {
        self.events
            .push(format!("intercept-release:{}:{}", self.name, value.label));
        Ok(value)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("component failed: {0}")]
pub struct Boom(pub &'static str);
