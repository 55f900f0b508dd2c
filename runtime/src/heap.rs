//! Heap objects, the runtime class mirror of `ClassInfo`, and the
//! background mark-and-sweep collector.
//!
//! `Value::Object` holds a strong `Rc`, the heap roster holds only
//! `Weak` references, so a cycle of objects referencing only each other
//! is invisible to Rust's own reference counting and must be found by
//! the collector.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bloch_compiler::ast::{Expr, Param, Stmt, Type};

use crate::value::Value;

pub type ObjectRef = Rc<RefCell<Object>>;

#[derive(Debug)]
pub struct Object {
    pub class: Rc<RuntimeClass>,
    pub fields: Vec<Value>,
    pub destroyed: bool,
    pub skip_destructor: bool,
    pub gc_mark: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeField {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub is_final: bool,
    pub is_tracked: bool,
    pub init: Option<Expr>,
    pub owner: String,
}

#[derive(Debug)]
pub struct RuntimeMethod {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Option<Rc<Vec<Stmt>>>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub signature: String,
    pub owner: String,
}

#[derive(Debug, Clone)]
pub enum MemberBodyRef {
    Default,
    Block(Rc<Vec<Stmt>>),
}

#[derive(Debug)]
pub struct RuntimeConstructor {
    pub params: Vec<Param>,
    pub body: MemberBodyRef,
    pub owner: String,
}

#[derive(Debug)]
pub struct RuntimeDestructor {
    pub body: MemberBodyRef,
    pub owner: String,
}

/// The runtime mirror of `ClassInfo`. A generic class's template
/// never appears here directly: each distinct type-argument tuple gets
/// its own `RuntimeClass`, keyed canonically as `Name<A,B,...>`.
#[derive(Debug)]
pub struct RuntimeClass {
    pub name: String,
    pub base: Option<Rc<RuntimeClass>>,
    /// Inherited-then-own instance fields, in declaration order; this is
    /// also the `Object::fields` layout.
    pub fields: Vec<RuntimeField>,
    pub static_fields: RefCell<HashMap<String, Value>>,
    /// Flattened like `ClassInfo::methods`: an override replaces its
    /// base entry in place, so a signature lookup here already resolves
    /// virtual dispatch without a separate vtable map.
    pub methods: Vec<Rc<RuntimeMethod>>,
    pub constructors: Vec<Rc<RuntimeConstructor>>,
    pub destructor: Option<Rc<RuntimeDestructor>>,
    pub type_args: Vec<String>,
    pub has_tracked_fields: bool,
    pub is_static: bool,
    /// Guards the one-time evaluation of static field initializers,
    /// which runs lazily on first reference to the class.
    pub statics_initialized: Cell<bool>,
}

impl RuntimeClass {
    pub fn ancestry(self: &Rc<Self>) -> Vec<Rc<RuntimeClass>> {
        let mut chain = Vec::new();
        let mut current = Some(Rc::clone(self));
        while let Some(c) = current {
            current = c.base.clone();
            chain.push(c);
        }
        chain
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &str) -> bool {
        self.ancestry().iter().any(|c| c.name == other)
    }

    pub fn instance_field_count(&self) -> usize {
        self.fields.iter().filter(|f| !f.is_static).count()
    }
}

/// Per-allocated-simulator-qubit bookkeeping.
#[derive(Debug, Clone)]
pub struct QubitInfo {
    pub label: String,
    pub measured: bool,
}

/// Background mark-and-sweep collector state.
///
/// The worker thread never touches heap objects directly — `RefCell` is
/// not `Sync`, and it doesn't need to be, since the thread only flips an
/// atomic flag that the main thread observes between statements. Actual
/// marking/sweeping always runs on the main thread.
pub struct Heap {
    roster: Mutex<Vec<std::rc::Weak<RefCell<Object>>>>,
    gc_requested: Arc<AtomicBool>,
    stop_gc: Arc<AtomicBool>,
    signal: Arc<(Mutex<()>, Condvar)>,
    worker: Option<JoinHandle<()>>,
    alloc_since_gc: Cell<u32>,
}

const GC_ALLOC_THRESHOLD: u32 = 16;
const GC_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl Heap {
    pub fn new() -> Self {
        let gc_requested = Arc::new(AtomicBool::new(false));
        let stop_gc = Arc::new(AtomicBool::new(false));
        let signal = Arc::new((Mutex::new(()), Condvar::new()));

        let worker = {
            let gc_requested = Arc::clone(&gc_requested);
            let stop_gc = Arc::clone(&stop_gc);
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                let (lock, cvar) = &*signal;
                loop {
                    let guard = lock.lock().unwrap();
                    let (_guard, _timeout) = cvar.wait_timeout(guard, GC_POLL_INTERVAL).unwrap();
                    if stop_gc.load(Ordering::Acquire) {
                        break;
                    }
                    gc_requested.store(true, Ordering::Release);
                }
            })
        };

        Heap {
            roster: Mutex::new(Vec::new()),
            gc_requested,
            stop_gc,
            signal,
            worker: Some(worker),
            alloc_since_gc: Cell::new(0),
        }
    }

    pub fn register(&self, obj: &ObjectRef) {
        let mut roster = self.roster.lock().unwrap();
        roster.push(Rc::downgrade(obj));
        drop(roster);

        let n = self.alloc_since_gc.get() + 1;
        self.alloc_since_gc.set(n);
        if n >= GC_ALLOC_THRESHOLD {
            self.gc_requested.store(true, Ordering::Release);
        }
    }

    pub fn should_collect(&self) -> bool {
        self.gc_requested.load(Ordering::Acquire)
    }

    pub fn clear_request(&self) {
        self.gc_requested.store(false, Ordering::Release);
        self.alloc_since_gc.set(0);
    }

    /// Prunes weak references whose object has already been dropped and
    /// returns the still-live set, upgraded to strong handles for
    /// marking.
    pub fn snapshot_live(&self) -> Vec<ObjectRef> {
        let mut roster = self.roster.lock().unwrap();
        roster.retain(|w| w.strong_count() > 0);
        roster.iter().filter_map(|w| w.upgrade()).collect()
    }

    /// Joins the collector thread; called once at the end of `execute`,
    /// so the program cleanly joins the collector before exiting.
    pub fn shutdown(&mut self) {
        self.stop_gc.store(true, Ordering::Release);
        let (_lock, cvar) = &*self.signal;
        cvar.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}
