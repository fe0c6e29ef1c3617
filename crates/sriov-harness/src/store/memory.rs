//! In-process resource store for tests and dry runs
//!
//! Besides plain CRUD the store can script the behaviour of the controllers
//! that would normally react to objects: reactors run after creates and
//! deletes and may add or remove other objects, faults make the next calls on
//! a kind fail, deletes of a given object can be swallowed to model
//! finalizers that never complete, and a deleted object can stay visible for
//! a few reads the way a terminating object does on a real API server.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DynamicObject, TypeMeta};
use kube::ResourceExt;
use parking_lot::Mutex;
use serde::Serialize;
use sriov_common::kube_utils::{to_dynamic, LabelSelector};
use sriov_common::{Error, Result, StoreErrorKind};
use tracing::trace;

use super::{DeleteMode, ListScope, ResourceKind, ResourceRef, ResourceStore};

/// Store operation, for fault injection and call accounting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// list
    List,
    /// get
    Get,
    /// create
    Create,
    /// update
    Update,
    /// delete
    Delete,
}

/// Side effect produced by a reactor
#[derive(Clone, Debug)]
pub enum Effect {
    /// Create or replace an object
    Upsert(ResourceKind, DynamicObject),
    /// Remove an object if present
    Remove(ResourceRef),
}

/// Callback run after a create or delete of a kind, receiving the object
pub type ObjectReactor = Arc<dyn Fn(&DynamicObject) -> Vec<Effect> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Key {
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn from_ref(r: &ResourceRef) -> Self {
        Self {
            kind: r.kind,
            namespace: r.namespace.clone().filter(|_| r.kind.is_namespaced()),
            name: r.name.clone(),
        }
    }

    fn from_object(kind: ResourceKind, obj: &DynamicObject) -> Result<Self> {
        let name = obj.metadata.name.clone().ok_or_else(|| {
            Error::store(StoreErrorKind::Terminal, kind.as_str(), "object has no name")
        })?;
        let namespace = if kind.is_namespaced() {
            Some(obj.namespace().ok_or_else(|| {
                Error::store(
                    StoreErrorKind::Terminal,
                    format!("{kind} {name}"),
                    "namespaced object has no namespace",
                )
            })?)
        } else {
            None
        };
        Ok(Self {
            kind,
            namespace,
            name,
        })
    }

    fn to_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    unregistered: HashSet<ResourceKind>,
    faults: HashMap<(ResourceKind, StoreOp), Vec<StoreErrorKind>>,
    ignored_deletes: HashMap<Key, usize>,
    lingering: HashMap<Key, usize>,
    terminating: HashMap<Key, usize>,
    on_create: HashMap<ResourceKind, Vec<ObjectReactor>>,
    on_delete: HashMap<ResourceKind, Vec<ObjectReactor>>,
    calls: Vec<(StoreOp, ResourceRef)>,
}

impl State {
    fn take_fault(&mut self, kind: ResourceKind, op: StoreOp) -> Option<StoreErrorKind> {
        let queue = self.faults.get_mut(&(kind, op))?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Upsert(kind, obj) => match Key::from_object(kind, &obj) {
                    Ok(key) => {
                        self.objects.insert(key, with_types(kind, obj));
                    }
                    Err(e) => trace!(error = %e, "Reactor produced an invalid object"),
                },
                Effect::Remove(r) => {
                    self.objects.remove(&Key::from_ref(&r));
                }
            }
        }
    }

    fn run_reactors(&mut self, kind: ResourceKind, obj: &DynamicObject, created: bool) {
        let reactors = if created {
            self.on_create.get(&kind).cloned()
        } else {
            self.on_delete.get(&kind).cloned()
        };
        for reactor in reactors.unwrap_or_default() {
            let effects = reactor(obj);
            self.apply(effects);
        }
    }

    fn remove(&mut self, key: &Key) -> Option<DynamicObject> {
        let removed = self.objects.remove(key)?;
        if key.kind == ResourceKind::Namespace {
            self.objects
                .retain(|k, _| k.namespace.as_deref() != Some(key.name.as_str()));
        }
        Some(removed)
    }
}

fn with_types(kind: ResourceKind, mut obj: DynamicObject) -> DynamicObject {
    let ar = kind.api_resource();
    obj.types = Some(TypeMeta {
        api_version: ar.api_version,
        kind: ar.kind,
    });
    obj
}

fn fault(kind: StoreErrorKind, resource: impl Into<String>) -> Error {
    Error::store(kind, resource, "injected fault")
}

/// [`ResourceStore`] holding objects in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object without running reactors
    pub fn insert(&self, kind: ResourceKind, obj: DynamicObject) -> Result<()> {
        let key = Key::from_object(kind, &obj)?;
        self.state.lock().objects.insert(key, with_types(kind, obj));
        Ok(())
    }

    /// Insert or replace a typed object without running reactors
    pub fn insert_typed<K: Serialize>(&self, kind: ResourceKind, obj: &K) -> Result<()> {
        self.insert(kind, to_dynamic(obj)?)
    }

    /// Whether the referenced object is present
    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.state
            .lock()
            .objects
            .contains_key(&Key::from_ref(reference))
    }

    /// Names of all stored objects of a kind, sorted
    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .map(|k| k.name.clone())
            .collect()
    }

    /// Make every list of `kind` fail as if the API server did not serve it
    pub fn unregister(&self, kind: ResourceKind) {
        self.state.lock().unregistered.insert(kind);
    }

    /// Make the next `times` calls of `op` on `kind` fail with `error`
    pub fn inject_fault(&self, kind: ResourceKind, op: StoreOp, error: StoreErrorKind, times: usize) {
        self.state
            .lock()
            .faults
            .entry((kind, op))
            .or_default()
            .extend(std::iter::repeat(error).take(times));
    }

    /// Accept the next `times` deletes of an object (normal or forced) without removing it
    pub fn ignore_deletes(&self, reference: &ResourceRef, times: usize) {
        *self
            .state
            .lock()
            .ignored_deletes
            .entry(Key::from_ref(reference))
            .or_default() += times;
    }

    /// Keep the object readable for `reads` gets after its next accepted delete
    ///
    /// Models finalizers and foreground propagation: the delete succeeds, the
    /// object lingers, then disappears on its own.
    pub fn linger_after_delete(&self, reference: &ResourceRef, reads: usize) {
        self.state
            .lock()
            .lingering
            .insert(Key::from_ref(reference), reads);
    }

    /// Run `reactor` after every successful create of `kind`
    pub fn on_create(&self, kind: ResourceKind, reactor: ObjectReactor) {
        self.state.lock().on_create.entry(kind).or_default().push(reactor);
    }

    /// Run `reactor` after every delete that removes an object of `kind`
    pub fn on_delete(&self, kind: ResourceKind, reactor: ObjectReactor) {
        self.state.lock().on_delete.entry(kind).or_default().push(reactor);
    }

    /// Number of `op` calls made against `kind`
    pub fn calls(&self, op: StoreOp, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(o, r)| *o == op && r.kind == kind)
            .count()
    }

    /// Number of delete calls made for one object
    pub fn delete_calls(&self, reference: &ResourceRef) -> usize {
        let key = Key::from_ref(reference);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(o, r)| *o == StoreOp::Delete && Key::from_ref(r) == key)
            .count()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(&self, kind: ResourceKind, scope: &ListScope) -> Result<Vec<DynamicObject>> {
        let mut state = self.state.lock();
        state.calls.push((
            StoreOp::List,
            ResourceRef {
                kind,
                name: String::new(),
                namespace: scope.namespace.clone(),
            },
        ));
        if state.unregistered.contains(&kind) {
            return Err(Error::store(
                StoreErrorKind::KindNotRegistered,
                kind.as_str(),
                "the server could not find the requested resource",
            ));
        }
        if let Some(err) = state.take_fault(kind, StoreOp::List) {
            return Err(fault(err, kind.as_str()));
        }
        let selector = LabelSelector::parse(scope.selector.as_deref().unwrap_or_default())
            .map_err(|e| Error::store(StoreErrorKind::Terminal, kind.as_str(), e.to_string()))?;
        let namespace = scope.namespace.as_deref().filter(|_| kind.is_namespaced());
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| selector.matches(o.labels()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn get(&self, reference: &ResourceRef) -> Result<DynamicObject> {
        let mut state = self.state.lock();
        state.calls.push((StoreOp::Get, reference.clone()));
        if let Some(err) = state.take_fault(reference.kind, StoreOp::Get) {
            return Err(fault(err, reference.to_string()));
        }
        let key = Key::from_ref(reference);
        let finished = match state.terminating.get_mut(&key) {
            Some(0) => true,
            Some(reads) => {
                *reads -= 1;
                false
            }
            None => false,
        };
        if finished {
            state.terminating.remove(&key);
            if let Some(removed) = state.remove(&key) {
                state.run_reactors(reference.kind, &removed, false);
            }
        }
        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(reference.to_string()))
    }

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject> {
        let key = Key::from_object(kind, object)?;
        let mut state = self.state.lock();
        state.calls.push((StoreOp::Create, key.to_ref()));
        if state.unregistered.contains(&kind) {
            return Err(Error::store(
                StoreErrorKind::NotFound,
                kind.as_str(),
                "the server could not find the requested resource",
            ));
        }
        if let Some(err) = state.take_fault(kind, StoreOp::Create) {
            return Err(fault(err, key.to_ref().to_string()));
        }
        if state.objects.contains_key(&key) {
            return Err(Error::store(
                StoreErrorKind::AlreadyExists,
                key.to_ref().to_string(),
                "already exists",
            ));
        }
        let stored = with_types(kind, object.clone());
        state.objects.insert(key, stored.clone());
        state.run_reactors(kind, &stored, true);
        Ok(stored)
    }

    async fn update(&self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject> {
        let key = Key::from_object(kind, object)?;
        let mut state = self.state.lock();
        state.calls.push((StoreOp::Update, key.to_ref()));
        if let Some(err) = state.take_fault(kind, StoreOp::Update) {
            return Err(fault(err, key.to_ref().to_string()));
        }
        if !state.objects.contains_key(&key) {
            return Err(Error::not_found(key.to_ref().to_string()));
        }
        let stored = with_types(kind, object.clone());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, reference: &ResourceRef, mode: DeleteMode) -> Result<()> {
        let key = Key::from_ref(reference);
        let mut state = self.state.lock();
        state.calls.push((StoreOp::Delete, reference.clone()));
        if let Some(err) = state.take_fault(reference.kind, StoreOp::Delete) {
            return Err(fault(err, reference.to_string()));
        }
        if !state.objects.contains_key(&key) {
            return Err(Error::not_found(reference.to_string()));
        }
        if let Some(remaining) = state.ignored_deletes.get_mut(&key).filter(|n| **n > 0) {
            *remaining -= 1;
            trace!(resource = %reference, ?mode, "Delete accepted but object retained");
            return Ok(());
        }
        if state.terminating.contains_key(&key) {
            return Ok(());
        }
        if let Some(reads) = state.lingering.remove(&key) {
            trace!(resource = %reference, ?mode, reads, "Object terminating");
            state.terminating.insert(key, reads);
            return Ok(());
        }
        if let Some(removed) = state.remove(&key) {
            state.run_reactors(reference.kind, &removed, false);
        }
        Ok(())
    }
}
