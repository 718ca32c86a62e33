//! Systems, their component filters, and the async systems manager (spec §4.I).
//!
//! A system is anything implementing [`System`]; registering one also
//! declares its *filter* — the `(component_type, Read|Write)` pairs it
//! touches — which `AsyncSystemsManager::init` uses to infer write/write and
//! read/write edges on top of whatever `goes_after` edges were declared
//! explicitly.

use crate::graph::{DependencyGraph, NodeId, Tracer};
use crate::pool::ThreadPool;
use legion_core::error::ContractError;
use legion_core::registry::ComponentTypeId;
use legion_core::world::World;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, trace};

/// A unit of work scheduled once per tick. Implementors typically hold
/// whatever per-system state they need (accumulators, cached queries);
/// `update` is the only method the scheduler calls, and is never called
/// concurrently with itself (the tracer's `Running` state guarantees that).
pub trait System: Send {
    fn update(&mut self, world: &World);
}

impl<F: FnMut(&World) + Send> System for F {
    fn update(&mut self, world: &World) { self(world) }
}

/// Opaque handle to a registered system, returned by
/// [`AsyncSystemsManager::register`] and consumed by
/// [`AsyncSystemsManager::goes_after`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SystemId(NodeId);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AccessMode {
    Read,
    Write,
}

/// The component filter a system declares at registration: which types it
/// reads, which it writes. Consumed by the scheduler two ways: for conflict
/// inference between systems, and by `init` to pre-register storage for
/// every named type before the first tick — a system body only ever sees a
/// shared `&World`, so the storage it writes through must already exist in
/// the store map by the time it runs (see `World::add_component_with`).
#[derive(Clone, Default, Debug)]
pub struct ComponentFilter {
    access: SmallVec<[(ComponentTypeId, AccessMode, fn(&mut World)); 8]>,
}

impl ComponentFilter {
    pub fn new() -> Self { Self::default() }

    pub fn read<T: legion_core::registry::Component + Clone>(mut self) -> Self {
        self.access.push((ComponentTypeId::of::<T>(), AccessMode::Read, |w| w.init_index::<T>()));
        self
    }

    pub fn write<T: legion_core::registry::Component + Clone>(mut self) -> Self {
        self.access.push((ComponentTypeId::of::<T>(), AccessMode::Write, |w| w.init_index::<T>()));
        self
    }

    fn conflicts_with(&self, other: &ComponentFilter) -> bool {
        self.access.iter().any(|&(ty, mode, _)| {
            other.access.iter().any(|&(oty, omode, _)| {
                ty == oty && (mode == AccessMode::Write || omode == AccessMode::Write)
            })
        })
    }

    fn init_storage(&self, world: &mut World) {
        for &(_, _, init) in &self.access {
            init(world);
        }
    }
}

struct RegisteredSystem {
    system: Box<dyn System>,
    filter: ComponentFilter,
}

/// Wraps a raw pointer so it can cross into the `'static + Send` task
/// closures the thread pool requires. Carries none of the aliasing
/// protection a reference would — soundness is the caller's job, argued at
/// each construction site the same way `World::storage_mut` is.
struct SharedConstPtr<T: ?Sized>(*const T);
unsafe impl<T: ?Sized + Send> Send for SharedConstPtr<T> {}

struct SharedMutPtr<T: ?Sized>(*mut T);
unsafe impl<T: ?Sized + Send> Send for SharedMutPtr<T> {}

/// Registers systems, builds the dependency graph from their declared
/// filters and ordering, and dispatches ready systems to a thread pool each
/// tick (spec §4.I algorithm).
pub struct AsyncSystemsManager {
    systems: Vec<RegisteredSystem>,
    explicit_edges: Vec<(NodeId, NodeId)>,
    graph: Option<DependencyGraph>,
    pool: Option<ThreadPool>,
}

impl Default for AsyncSystemsManager {
    fn default() -> Self {
        AsyncSystemsManager {
            systems: Vec::new(),
            explicit_edges: Vec::new(),
            graph: None,
            pool: None,
        }
    }
}

impl AsyncSystemsManager {
    pub fn new() -> Self { Self::default() }

    /// Registers a system with its declared component filter. Must be
    /// called before `init`.
    pub fn register<S: System + 'static>(&mut self, system: S, filter: ComponentFilter) -> SystemId {
        debug_assert!(self.graph.is_none(), "register called after init()");
        let id = self.systems.len();
        self.systems.push(RegisteredSystem { system: Box::new(system), filter });
        SystemId(id)
    }

    /// Declares that `system` must run after `dependency`.
    pub fn goes_after(&mut self, system: SystemId, dependency: SystemId) {
        debug_assert!(self.graph.is_none(), "goes_after called after init()");
        self.explicit_edges.push((dependency.0, system.0));
    }

    /// Builds the dependency graph (explicit edges, then inferred
    /// read/write conflicts between every ordered pair, earlier system wins
    /// the edge), pre-registers storage for every type any filter names,
    /// and constructs the worker pool.
    pub fn init(&mut self, world: &mut World, worker_count: usize) -> Result<(), ContractError> {
        let n = self.systems.len();
        let mut graph = DependencyGraph::init_nodes(n);
        for &(u, v) in &self.explicit_edges {
            graph.add_dependency(u, v);
        }
        for j in 0..n {
            for i in 0..j {
                if self.systems[i].filter.conflicts_with(&self.systems[j].filter) {
                    graph.add_dependency(i, j);
                }
            }
        }
        graph.finalize()?;
        for registered in &self.systems {
            registered.filter.init_storage(world);
        }
        debug!(systems = n, workers = worker_count, "systems graph finalized");
        self.graph = Some(graph);
        self.pool = Some(ThreadPool::new(worker_count));
        Ok(())
    }

    /// `init` sized to the machine's available parallelism.
    pub fn init_default(&mut self, world: &mut World) -> Result<(), ContractError> {
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        self.init(world, worker_count)
    }

    /// Runs one tick: every system executes exactly once, respecting the
    /// dependency graph, with maximum parallelism across the pool.
    pub fn update(&self, world: &World) {
        let graph = self.graph.as_ref().expect("AsyncSystemsManager::init must run before update");
        let pool = self.pool.as_ref().expect("AsyncSystemsManager::init must run before update");
        let tracer = Arc::new(graph.new_tracer());

        if tracer.all_done() {
            return;
        }

        self.dispatch_ready(pool, &tracer, world);
        pool.finalize_tasks();
    }

    fn dispatch_ready(&self, pool: &ThreadPool, tracer: &Arc<Tracer>, world: &World) {
        for v in tracer.get_next_systems_to_run() {
            tracer.run_system(v);
            trace!(system = v, "dispatching system");

            let tracer = tracer.clone();
            // Sound for the same reason `World::storage_mut` is: distinct
            // systems are distinct `Box<dyn System>` allocations, and the
            // tracer guarantees no system index is ever dispatched twice
            // concurrently.
            let system_ptr = SharedMutPtr(self.system_mut_ptr(v));
            let world_ptr = SharedConstPtr(world as *const World);
            let manager_ptr = SharedConstPtr(self as *const AsyncSystemsManager);

            pool.submit(
                move || {
                    let system = unsafe { &mut *system_ptr.0 };
                    let world = unsafe { &*world_ptr.0 };
                    system.update(world);
                },
                Some(move |()| {
                    tracer.finish_system(v);
                    let manager = unsafe { &*manager_ptr.0 };
                    let world = unsafe { &*world_ptr.0 };
                    manager.dispatch_ready(manager.pool.as_ref().expect("init ran"), &tracer, world);
                }),
            );
        }
    }

    fn system_mut_ptr(&self, id: NodeId) -> *mut dyn System {
        let system_ref: &dyn System = self.systems[id].system.as_ref();
        system_ref as *const dyn System as *mut dyn System
    }
}
