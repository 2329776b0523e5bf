//! In-process fakes for the pod client, resource store and event sink
//!
//! `SimulatedPods` behaves like a cluster where every created unit runs to
//! completion at once: creating a pod immediately reports it Running and then
//! terminal to the completion watcher, and deleting pods reports each
//! deletion. `InMemoryStore` keeps resources in a map with apply semantics
//! and applies status writes to a stored document the way the API server
//! applies the status patch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::api::DynamicObject;

use crate::controller::{status_patch, ComponentStore};
use crate::crd::{ComponentKind, CompositeStatus, ResourceIdentity, UnitPhase};
use crate::events::{CompositeEvent, EventPublisher};
use crate::executor::{CompletionWatcher, PodClient, UnitEvent};
use crate::Error;

struct SimulatedUnit {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    phase: UnitPhase,
}

#[derive(Default)]
struct PodState {
    units: Vec<SimulatedUnit>,
    submitted: Vec<Pod>,
    deleted: Vec<String>,
    failing: BTreeSet<String>,
}

fn matches(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

/// Pod client whose units finish as soon as they are created
pub struct SimulatedPods {
    completion: Arc<CompletionWatcher>,
    state: Mutex<PodState>,
}

impl SimulatedPods {
    pub fn new(completion: Arc<CompletionWatcher>) -> Self {
        Self {
            completion,
            state: Mutex::new(PodState::default()),
        }
    }

    /// Add a unit left over from an earlier run
    pub fn seed_existing(&self, namespace: &str, identity: &ResourceIdentity, unit: &str) {
        self.state.lock().unwrap().units.push(SimulatedUnit {
            name: unit.to_string(),
            namespace: namespace.to_string(),
            labels: identity.unit_labels(),
            phase: UnitPhase::Succeeded,
        });
    }

    /// Units created for the resource named `name` end in `Failed`
    pub fn fail_resource(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    /// Units created for `name` succeed again
    pub fn recover_resource(&self, name: &str) {
        self.state.lock().unwrap().failing.remove(name);
    }

    /// Names of units removed through `delete_matching`, in order
    pub fn deleted_units(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Every pod passed to `create`, in order
    pub fn submitted(&self) -> Vec<Pod> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Units currently present
    pub fn live_units(&self) -> usize {
        self.state.lock().unwrap().units.len()
    }

    fn send(&self, labels: &BTreeMap<String, String>, event: UnitEvent) {
        if let Some(identity) = ResourceIdentity::from_unit_labels(labels) {
            let _ = self.completion.dispatch(&identity, event);
        }
    }
}

#[async_trait]
impl PodClient for SimulatedPods {
    async fn list_names(&self, namespace: &str, selector: &str) -> Result<Vec<String>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .units
            .iter()
            .filter(|u| u.namespace == namespace && matches(&u.labels, selector))
            .map(|u| u.name.clone())
            .collect())
    }

    async fn delete_matching(&self, namespace: &str, selector: &str) -> Result<(), Error> {
        let removed: Vec<SimulatedUnit> = {
            let mut state = self.state.lock().unwrap();
            let (removed, kept): (Vec<SimulatedUnit>, Vec<SimulatedUnit>) =
                std::mem::take(&mut state.units)
                    .into_iter()
                    .partition(|u| u.namespace == namespace && matches(&u.labels, selector));
            state.units = kept;
            state.deleted.extend(removed.iter().map(|u| u.name.clone()));
            removed
        };
        for unit in removed {
            self.send(&unit.labels, UnitEvent::Deleted { unit: unit.name });
        }
        Ok(())
    }

    async fn create(&self, pod: &Pod) -> Result<(), Error> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        let phase = {
            let mut state = self.state.lock().unwrap();
            let failing = ResourceIdentity::from_unit_labels(&labels)
                .is_some_and(|id| state.failing.contains(&id.name));
            let phase = if failing {
                UnitPhase::Failed
            } else {
                UnitPhase::Succeeded
            };
            state.submitted.push(pod.clone());
            state.units.push(SimulatedUnit {
                name: name.clone(),
                namespace,
                labels: labels.clone(),
                phase,
            });
            phase
        };

        self.send(
            &labels,
            UnitEvent::Applied {
                unit: name.clone(),
                phase: UnitPhase::Running,
            },
        );
        self.send(&labels, UnitEvent::Applied { unit: name, phase });
        Ok(())
    }

    async fn remove_succeeded(&self, namespace: &str, selector: &str) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();
        let before = state.units.len();
        state.units.retain(|u| {
            !(u.namespace == namespace
                && u.phase == UnitPhase::Succeeded
                && matches(&u.labels, selector))
        });
        Ok(before - state.units.len())
    }
}

type StoreKey = (ComponentKind, String, String);

fn key(kind: ComponentKind, namespace: &str, name: &str) -> StoreKey {
    (kind, namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct StoreState {
    objects: Vec<(StoreKey, DynamicObject)>,
    composites: BTreeMap<(String, String), serde_json::Value>,
    last_written: Option<(String, String)>,
    next_uid: u64,
}

impl StoreState {
    fn find(&mut self, key: &StoreKey) -> Option<&mut DynamicObject> {
        self.objects
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, o)| o)
    }

    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }
}

/// Resource store backed by memory
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a resource in place as if created by someone else
    pub fn seed(&self, kind: ComponentKind, mut object: DynamicObject) {
        let mut state = self.state.lock().unwrap();
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(state.uid());
        }
        let k = key(
            kind,
            object.metadata.namespace.as_deref().unwrap_or_default(),
            object.metadata.name.as_deref().unwrap_or_default(),
        );
        state.objects.push((k, object));
    }

    pub fn get(&self, kind: ComponentKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.state
            .lock()
            .unwrap()
            .find(&key(kind, namespace, name))
            .cloned()
    }

    pub fn count(&self, kind: ComponentKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .count()
    }

    /// Stored status of the composite written most recently
    pub fn last_status(&self) -> Option<CompositeStatus> {
        let state = self.state.lock().unwrap();
        let doc = state.composites.get(state.last_written.as_ref()?)?;
        serde_json::from_value(doc.get("status")?.clone()).ok()
    }

    /// Raw stored status document of one composite
    pub fn status_document(&self, namespace: &str, name: &str) -> Option<serde_json::Value> {
        let state = self.state.lock().unwrap();
        state
            .composites
            .get(&(namespace.to_string(), name.to_string()))?
            .get("status")
            .cloned()
    }
}

#[async_trait]
impl ComponentStore for InMemoryStore {
    async fn load(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, Error> {
        self.get(kind, namespace, name)
            .ok_or_else(|| Error::not_found(format!("{kind} {namespace}/{name}")))
    }

    async fn create_or_patch(
        &self,
        kind: ComponentKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let (Some(namespace), Some(name)) = (
            object.metadata.namespace.as_deref(),
            object.metadata.name.as_deref(),
        ) else {
            return Err(Error::validation("object needs a namespace and a name"));
        };
        let k = key(kind, namespace, name);

        let mut state = self.state.lock().unwrap();
        let mut applied = object.clone();
        let existing_uid = state.find(&k).map(|o| o.metadata.uid.clone());
        match existing_uid {
            Some(uid) => {
                applied.metadata.uid = uid;
                state.objects.retain(|(existing, _)| *existing != k);
            }
            None => applied.metadata.uid = Some(state.uid()),
        }
        state.objects.push((k, applied.clone()));
        Ok(applied)
    }

    async fn remove_annotation(
        &self,
        kind: ComponentKind,
        namespace: &str,
        name: &str,
        key_name: &str,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let object = state
            .find(&key(kind, namespace, name))
            .ok_or_else(|| Error::not_found(format!("{kind} {namespace}/{name}")))?;
        if let Some(annotations) = object.metadata.annotations.as_mut() {
            annotations.remove(key_name);
        }
        Ok(())
    }

    async fn patch_composite_status(
        &self,
        namespace: &str,
        name: &str,
        status: &CompositeStatus,
    ) -> Result<(), Error> {
        let patch = status_patch(status)?;
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        let doc = state
            .composites
            .entry(key.clone())
            .or_insert_with(|| serde_json::json!({}));
        json_patch::patch(doc, &patch.0)
            .map_err(|e| Error::internal_with_context("status patch", e.to_string()))?;
        state.last_written = Some(key);
        Ok(())
    }
}

/// Event sink that discards everything
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _composite: &ObjectReference, _event: CompositeEvent) {}
}
