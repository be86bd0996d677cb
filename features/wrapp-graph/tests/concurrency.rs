//! Integration tests for readers and callers racing a transition in flight.

mod common;

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use common::{Boom, Events, Knob, Tracked};
use wrapp_graph::{DynError, GraphConfig, GraphDraw, Node, PromiseOf, Resolver, RuntimeGraph};

/// Lets a test hold a factory inside a running transition
#[derive(Clone)]
struct Gate {
    armed: Knob,
    entered: Arc<Barrier>,
    resume: Arc<Barrier>,
}

impl Gate {
    fn new() -> Self {
        Gate {
            armed: Knob::new(0),
            entered: Arc::new(Barrier::new(2)),
            resume: Arc::new(Barrier::new(2)),
        }
    }

    /// Called by factories, blocks while armed until the test resumes it
    fn pass(&self) {
        if self.armed.get() == 1 {
            self.entered.wait();
            self.resume.wait();
        }
    }
}

struct Parked {
    graph: RuntimeGraph,
    a: Node<Tracked>,
    promise: PromiseOf<Tracked>,
    knob: Knob,
    fail: Knob,
    gate: Gate,
}

/// A ← B, where B waits at the gate and then optionally fails
fn parked(events: &Events) -> Parked {
    let (knob, fail, gate) = (Knob::new(1), Knob::new(0), Gate::new());
    let mut draw = GraphDraw::new("parked");

    let a = {
        let (events, knob) = (events.clone(), knob.clone());
        draw.add_node(move |_: &Resolver| Ok(Tracked::new("A", knob.get(), &events)))
            .with_lifecycle()
            .build()
    };
    {
        let (events, fail, gate) = (events.clone(), fail.clone(), gate.clone());
        draw.add_node(move |graph| {
            let version = graph.get(&a)?.version;
            gate.pass();
            if fail.get() == 1 {
                return Err(Box::new(Boom("B")) as DynError);
            }
            Ok(Tracked::new("B", version, &events))
        })
        .depends_on(&a)
        .with_lifecycle()
        .build();
    }
    let promise = draw.promise_of(&a);

    let config = GraphConfig::default().with_worker_threads(2);
    let graph = RuntimeGraph::builder(draw).config(config).build().unwrap();
    graph.init().unwrap();

    Parked {
        graph,
        a,
        promise,
        knob,
        fail,
        gate,
    }
}

/// Versions of A seen through the engine, a value binding and a promise
fn observed(parked: &Parked) -> [u32; 3] {
    [
        parked.graph.get(&parked.a).unwrap().version,
        parked.graph.value_of(&parked.a).get().unwrap().version,
        parked.promise.get().unwrap().version,
    ]
}

/// Instances built by a failing refresh never become visible to any reader.
#[test]
fn readers_never_see_a_rolled_back_generation() {
    let events = Events::default();
    let parked = parked(&events);
    parked.knob.set(2);
    parked.fail.set(1);
    parked.gate.armed.set(1);

    thread::scope(|scope| {
        let refresh = {
            let (graph, a) = (parked.graph.clone(), parked.a);
            scope.spawn(move || graph.refresh(&a))
        };

        parked.gate.entered.wait();
        // A#2 is built, B is still constructing
        assert_eq!(events.count("build:A#2"), 1);
        assert_eq!(observed(&parked), [1, 1, 1]);
        parked.gate.resume.wait();

        let error = refresh.join().unwrap().unwrap_err();
        assert_eq!(error.downcast_ref::<Boom>(), Some(&Boom("B")));
    });

    assert_eq!(observed(&parked), [1, 1, 1]);
    assert_eq!(events.count("release:A#2"), 1);
}

/// Readers switch to the new instances only once the refresh published them.
#[test]
fn readers_switch_on_publication() {
    let events = Events::default();
    let parked = parked(&events);
    parked.knob.set(2);
    parked.gate.armed.set(1);

    thread::scope(|scope| {
        let refresh = {
            let (graph, a) = (parked.graph.clone(), parked.a);
            scope.spawn(move || graph.refresh(&a))
        };

        parked.gate.entered.wait();
        assert_eq!(observed(&parked), [1, 1, 1]);
        parked.gate.resume.wait();

        refresh.join().unwrap().unwrap();
    });

    assert_eq!(observed(&parked), [2, 2, 2]);
    assert_eq!(events.count("release:A#1"), 1);
}

/// A second refresh waits until the first one published and tore down what it replaced.
#[test]
fn concurrent_refreshes_are_serialized() {
    let events = Events::default();
    let (knob_a, knob_b, gate) = (Knob::new(1), Knob::new(1), Gate::new());
    let mut draw = GraphDraw::new("serialized");

    let a = {
        let (events, knob, gate) = (events.clone(), knob_a.clone(), gate.clone());
        draw.add_node(move |_: &Resolver| {
            gate.pass();
            Ok(Tracked::new("A", knob.get(), &events))
        })
        .with_lifecycle()
        .build()
    };
    let b = {
        let (events, knob) = (events.clone(), knob_b.clone());
        draw.add_node(move |_: &Resolver| Ok(Tracked::new("B", knob.get(), &events)))
            .with_lifecycle()
            .build()
    };

    let config = GraphConfig::default().with_worker_threads(2);
    let graph = RuntimeGraph::builder(draw).config(config).build().unwrap();
    graph.init().unwrap();

    knob_a.set(2);
    knob_b.set(2);
    gate.armed.set(1);

    thread::scope(|scope| {
        let first = {
            let graph = graph.clone();
            scope.spawn(move || graph.refresh(&a))
        };
        gate.entered.wait();

        let second = {
            let graph = graph.clone();
            scope.spawn(move || graph.refresh(&b))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(events.count("build:B#2"), 0);

        gate.resume.wait();
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();
    });

    assert!(events.position("release:A#1") < events.position("build:B#2"));
    assert_eq!(graph.get(&a).unwrap().version, 2);
    assert_eq!(graph.get(&b).unwrap().version, 2);
}
