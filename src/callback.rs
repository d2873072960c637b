// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Thread-safe observer registries.
//
// The registry lock only guards the id map; user callbacks always run outside
// of it, under their own per-node lock:
//   - exclusive node lock: invocations of one callback are serialized
//   - shared node lock ("concurrent" managers): one callback may run on
//     several `call` threads at once
// Removal with `wait = true` takes the node lock exclusively, which is what
// guarantees no invocation is in flight once it returns.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

type Callback<A> = Box<dyn Fn(&A) + Send + Sync + 'static>;
type FaultHandler = Arc<dyn Fn(&CallbackFault) + Send + Sync + 'static>;

/// A panic raised by a callback during `call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFault {
    /// Id of the callback that panicked.
    pub id: u64,
    /// Panic message, when the payload was a string.
    pub message: String,
}

impl CallbackFault {
    fn from_payload(id: u64, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { id, message }
    }
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback {} panicked: {}", self.id, self.message)
    }
}

struct CallbackNode<A, K> {
    id: u64,
    name: K,
    callback: RwLock<Option<Callback<A>>>,
}

impl<A, K> CallbackNode<A, K> {
    fn new(id: u64, name: K, callback: Callback<A>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            callback: RwLock::new(Some(callback)),
        })
    }

    fn release(&self, wait: bool) {
        if wait {
            self.callback.write().take();
        } else if let Some(mut slot) = self.callback.try_write() {
            slot.take();
        }
    }

    fn invoke(&self, args: &A, concurrent: bool, on_fault: Option<&FaultHandler>) {
        let outcome = if concurrent {
            let slot = self.callback.read();
            match slot.as_ref() {
                Some(cb) => panic::catch_unwind(AssertUnwindSafe(|| cb(args))),
                None => return,
            }
        } else {
            let slot = self.callback.write();
            match slot.as_ref() {
                Some(cb) => panic::catch_unwind(AssertUnwindSafe(|| cb(args))),
                None => return,
            }
        };
        if let Err(payload) = outcome {
            match on_fault {
                Some(handler) => handler(&CallbackFault::from_payload(self.id, payload.as_ref())),
                None => panic::resume_unwind(payload),
            }
        }
    }
}

fn dispatch<A, K>(
    nodes: &[Arc<CallbackNode<A, K>>],
    args: &A,
    concurrent: bool,
    on_fault: Option<FaultHandler>,
) -> bool {
    if nodes.is_empty() {
        return false;
    }
    for node in nodes {
        node.invoke(args, concurrent, on_fault.as_ref());
    }
    true
}

// ---------------------------------------------------------------------------
// CallbackManager
// ---------------------------------------------------------------------------

struct Registry<A> {
    nodes: BTreeMap<u64, Arc<CallbackNode<A, ()>>>,
    next_id: u64,
}

/// Registry of callbacks invoked together by [`CallbackManager::call`].
///
/// `A` is the argument type handed to every callback by reference; use a
/// tuple for several values and `()` for none.
pub struct CallbackManager<A = ()> {
    registry: Mutex<Registry<A>>,
    max_callbacks: usize,
    concurrent: bool,
    fault_handler: RwLock<Option<FaultHandler>>,
}

impl<A> CallbackManager<A> {
    /// `max_callbacks == 0` means unbounded. `concurrent` lets one callback
    /// run on several `call` threads simultaneously.
    pub fn new(max_callbacks: usize, concurrent: bool) -> Self {
        Self {
            registry: Mutex::new(Registry {
                nodes: BTreeMap::new(),
                next_id: 0,
            }),
            max_callbacks,
            concurrent,
            fault_handler: RwLock::new(None),
        }
    }

    /// Register `callback`. Returns its id, or 0 when the manager is full.
    pub fn add_callback<F>(&self, callback: F) -> u64
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let mut reg = self.registry.lock();
        if self.max_callbacks != 0 && reg.nodes.len() >= self.max_callbacks {
            return 0;
        }
        reg.next_id += 1;
        let id = reg.next_id;
        reg.nodes.insert(id, CallbackNode::new(id, (), Box::new(callback)));
        id
    }

    /// Unregister `id`.
    ///
    /// With `wait`, blocks until a running invocation of this callback has
    /// returned; afterwards it is never invoked again. Without `wait` the
    /// closure is dropped only if it is not running right now. Calling this
    /// with `wait` from inside the callback itself deadlocks.
    pub fn remove_callback(&self, id: u64, wait: bool) -> bool {
        let node = self.registry.lock().nodes.remove(&id);
        match node {
            Some(node) => {
                node.release(wait);
                true
            }
            None => false,
        }
    }

    /// Invoke every registered callback with `args`.
    /// Returns `false` when no callback is registered.
    ///
    /// A panicking callback is reported to the fault handler. Without a
    /// handler the panic propagates and the remaining callbacks of this call
    /// are skipped.
    pub fn call(&self, args: &A) -> bool {
        let snapshot: Vec<_> = self.registry.lock().nodes.values().cloned().collect();
        let on_fault = self.fault_handler.read().clone();
        dispatch(&snapshot, args, self.concurrent, on_fault)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().nodes.len()
    }

    /// Ids of all registered callbacks, ascending.
    pub fn callback_ids(&self) -> Vec<u64> {
        self.registry.lock().nodes.keys().copied().collect()
    }

    /// Remove every callback; returns how many were removed.
    pub fn clear(&self, wait: bool) -> usize {
        let ids = self.callback_ids();
        for id in &ids {
            self.remove_callback(*id, wait);
        }
        ids.len()
    }

    pub fn set_fault_handler<F>(&self, handler: F)
    where
        F: Fn(&CallbackFault) + Send + Sync + 'static,
    {
        *self.fault_handler.write() = Some(Arc::new(handler));
    }

    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }
}

impl<A> Default for CallbackManager<A> {
    fn default() -> Self {
        Self::new(0, false)
    }
}

impl<A> Drop for CallbackManager<A> {
    fn drop(&mut self) {
        self.clear(true);
    }
}

// ---------------------------------------------------------------------------
// NameCallbackManager
// ---------------------------------------------------------------------------

struct NameRegistry<K, A> {
    nodes: BTreeMap<u64, Arc<CallbackNode<A, K>>>,
    index: HashMap<K, BTreeSet<u64>>,
    next_id: u64,
}

impl<K: Eq + Hash, A> NameRegistry<K, A> {
    fn take(&mut self, id: u64) -> Option<Arc<CallbackNode<A, K>>> {
        let node = self.nodes.remove(&id)?;
        if let Some(ids) = self.index.get_mut(&node.name) {
            ids.remove(&id);
            if ids.is_empty() {
                self.index.remove(&node.name);
            }
        }
        Some(node)
    }
}

/// Callback registry keyed by name: [`NameCallbackManager::call`] only
/// reaches callbacks registered under exactly that name.
///
/// The capacity bound applies per name.
pub struct NameCallbackManager<K, A = ()> {
    registry: Mutex<NameRegistry<K, A>>,
    max_callbacks: usize,
    concurrent: bool,
    fault_handler: RwLock<Option<FaultHandler>>,
}

impl<K, A> NameCallbackManager<K, A>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_callbacks: usize, concurrent: bool) -> Self {
        Self {
            registry: Mutex::new(NameRegistry {
                nodes: BTreeMap::new(),
                index: HashMap::new(),
                next_id: 0,
            }),
            max_callbacks,
            concurrent,
            fault_handler: RwLock::new(None),
        }
    }

    /// Register `callback` under `name`. Returns its id, or 0 when `name`
    /// already has `max_callbacks` callbacks.
    pub fn add_callback<F>(&self, name: K, callback: F) -> u64
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let mut reg = self.registry.lock();
        let count = reg.index.get(&name).map_or(0, BTreeSet::len);
        if self.max_callbacks != 0 && count >= self.max_callbacks {
            return 0;
        }
        reg.next_id += 1;
        let id = reg.next_id;
        reg.index.entry(name.clone()).or_default().insert(id);
        reg.nodes.insert(id, CallbackNode::new(id, name, Box::new(callback)));
        id
    }

    /// Unregister `id`; same waiting rules as [`CallbackManager::remove_callback`].
    pub fn remove_callback(&self, id: u64, wait: bool) -> bool {
        let node = self.registry.lock().take(id);
        match node {
            Some(node) => {
                node.release(wait);
                true
            }
            None => false,
        }
    }

    /// Unregister every callback under `name`.
    pub fn remove_name(&self, name: &K, wait: bool) -> bool {
        let ids = self.callback_ids_name(name);
        if ids.is_empty() {
            return false;
        }
        for id in ids {
            self.remove_callback(id, wait);
        }
        true
    }

    /// Invoke the callbacks registered under `name`.
    /// Returns `false` when there are none.
    pub fn call(&self, name: &K, args: &A) -> bool {
        let snapshot: Vec<_> = {
            let reg = self.registry.lock();
            match reg.index.get(name) {
                Some(ids) => ids.iter().filter_map(|id| reg.nodes.get(id).cloned()).collect(),
                None => Vec::new(),
            }
        };
        let on_fault = self.fault_handler.read().clone();
        dispatch(&snapshot, args, self.concurrent, on_fault)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().nodes.is_empty()
    }

    pub fn is_empty_name(&self, name: &K) -> bool {
        !self.registry.lock().index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().nodes.len()
    }

    pub fn len_name(&self, name: &K) -> usize {
        self.registry.lock().index.get(name).map_or(0, BTreeSet::len)
    }

    pub fn callback_ids(&self) -> Vec<u64> {
        self.registry.lock().nodes.keys().copied().collect()
    }

    pub fn callback_ids_name(&self, name: &K) -> Vec<u64> {
        self.registry
            .lock()
            .index
            .get(name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, wait: bool) -> usize {
        let ids = self.callback_ids();
        for id in &ids {
            self.remove_callback(*id, wait);
        }
        ids.len()
    }

    pub fn set_fault_handler<F>(&self, handler: F)
    where
        F: Fn(&CallbackFault) + Send + Sync + 'static,
    {
        *self.fault_handler.write() = Some(Arc::new(handler));
    }
}

impl<K, A> Default for NameCallbackManager<K, A>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(0, false)
    }
}

impl<K, A> Drop for NameCallbackManager<K, A> {
    fn drop(&mut self) {
        let nodes = std::mem::take(&mut self.registry.get_mut().nodes);
        for node in nodes.values() {
            node.release(true);
        }
    }
}
