use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use wrapp_graph::{
    DynError, GraphDraw, GraphInterceptor, Lifecycle, Resolver, RuntimeGraph, ValueOf,
};

fn main() -> Result<(), DynError> {
    let mut draw = GraphDraw::new("demo");

    let version = Arc::new(AtomicU32::new(1));
    let settings = {
        let version = version.clone();
        draw.add_node(move |_: &Resolver| {
            Ok(Settings {
                version: version.load(Ordering::SeqCst),
            })
        })
        .compare_eq()
        .build()
    };
    let audit = draw.add_instance(Audit).build();
    let service = draw
        .add_node(move |graph| {
            Ok(Service {
                settings: graph.get(&settings)?,
                live: graph.value_of(&settings),
            })
        })
        .depends_on(&settings)
        .intercepted_by(&audit)
        .with_lifecycle()
        .build();

    let graph = RuntimeGraph::new(draw)?;
    graph.init()?;
    println!("{:?}", graph);

    let before = graph.get(&service)?;
    println!("{:?}", before);

    // Same settings - the service survives
    graph.refresh(&settings)?;
    println!("unchanged: {}", Arc::ptr_eq(&before, &graph.get(&service)?));

    version.store(2, Ordering::SeqCst);
    graph.refresh(&settings)?;
    let after = graph.get(&service)?;
    println!("{:?}", after);
    println!("stale binding now sees: {:?}", before.live.get()?);

    graph.release()?;
    println!("{:?}", graph);
    Ok(())
}

#[derive(Debug, PartialEq)]
struct Settings {
    version: u32,
}

struct Service {
    settings: Arc<Settings>,
    live: ValueOf<Settings>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Lifecycle for Service {
    fn init(&self) -> Result<(), DynError> {
        println!("service v{} started", self.settings.version);
        Ok(())
    }

    fn release(&self) -> Result<(), DynError> {
        println!("service v{} stopped", self.settings.version);
        Ok(())
    }
}

struct Audit;

impl GraphInterceptor<Service> for Audit {
    fn init(&self, value: Arc<Service>) -> Result<Arc<Service>, DynError> {
        println!("audit: service created");
        Ok(value)
    }

    fn release(&self, value: Arc<Service>) -> Result<Arc<Service>, DynError> {
        println!("audit: service destroyed");
        Ok(value)
    }
}
