//! Watch pump feeding execution unit events into the completion watcher
//!
//! Watches every pod carrying the resource-kind label in the controller
//! namespace and dispatches its lifecycle to the waiter attached for the
//! identity recovered from the pod's labels.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::watcher::{CompletionWatcher, DispatchError, UnitEvent};
use crate::crd::{ResourceIdentity, UnitPhase};

/// Translate a pod into the identity it deploys and its lifecycle event.
///
/// Pods without the full label set are not execution units and yield `None`.
pub fn unit_event_for_pod(pod: &Pod, deleted: bool) -> Option<(ResourceIdentity, UnitEvent)> {
    let labels = pod.metadata.labels.as_ref()?;
    let identity = ResourceIdentity::from_unit_labels(labels)?;
    let unit = pod.metadata.name.clone()?;

    let event = if deleted {
        UnitEvent::Deleted { unit }
    } else {
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        UnitEvent::Applied {
            unit,
            phase: UnitPhase::from_pod_phase(phase),
        }
    };
    Some((identity, event))
}

/// Units seen by the watch, used to recover deletions hidden by a relist.
///
/// After a watch error the stream relists from scratch. A unit deleted while
/// the watch was down is simply absent from the new listing, so once the
/// listing is done every previously known unit it did not contain is
/// reported as deleted.
#[derive(Debug, Default)]
pub struct UnitTracker {
    known: BTreeMap<String, ResourceIdentity>,
    relisted: Option<BTreeMap<String, ResourceIdentity>>,
}

impl UnitTracker {
    /// Create a tracker that knows no units
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one watcher event into unit events
    pub fn observe(&mut self, event: Event<Pod>) -> Vec<(ResourceIdentity, UnitEvent)> {
        match event {
            Event::Init => {
                self.relisted = Some(BTreeMap::new());
                Vec::new()
            }
            Event::InitApply(pod) => {
                let translated = unit_event_for_pod(&pod, false);
                if let (Some((identity, event)), Some(relisted)) =
                    (&translated, self.relisted.as_mut())
                {
                    relisted.insert(event.unit().to_string(), identity.clone());
                }
                translated.into_iter().collect()
            }
            Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let vanished: Vec<(ResourceIdentity, UnitEvent)> = std::mem::take(&mut self.known)
                    .into_iter()
                    .filter(|(unit, _)| !relisted.contains_key(unit))
                    .map(|(unit, identity)| (identity, UnitEvent::Deleted { unit }))
                    .collect();
                if !vanished.is_empty() {
                    debug!(count = vanished.len(), "Units vanished while the watch relisted");
                }
                self.known = relisted;
                vanished
            }
            Event::Apply(pod) => {
                let translated = unit_event_for_pod(&pod, false);
                if let Some((identity, event)) = &translated {
                    self.known.insert(event.unit().to_string(), identity.clone());
                }
                translated.into_iter().collect()
            }
            Event::Delete(pod) => {
                let translated = unit_event_for_pod(&pod, true);
                if let Some((_, event)) = &translated {
                    self.known.remove(event.unit());
                }
                translated.into_iter().collect()
            }
        }
    }
}

/// Deliver unit events, ignoring identities nobody is waiting for
pub fn forward(completion: &CompletionWatcher, events: Vec<(ResourceIdentity, UnitEvent)>) {
    for (identity, event) in events {
        match completion.dispatch(&identity, event) {
            Ok(()) | Err(DispatchError::NoWaiter) => {}
            Err(e) => debug!(identity = %identity, error = %e, "Unit event not delivered"),
        }
    }
}

/// Run the pod watch until `cancel` fires or the stream ends.
///
/// `ready` fires once the initial listing is complete. Units created after
/// that point are guaranteed to be seen by the watch.
pub async fn run_unit_watch(
    client: Client,
    namespace: String,
    completion: Arc<CompletionWatcher>,
    cancel: CancellationToken,
    ready: oneshot::Sender<()>,
) {
    let api: Api<Pod> = Api::namespaced(client, &namespace);
    let config = watcher::Config::default().labels(crate::RESOURCE_KIND_LABEL);
    let stream = watcher(api, config).default_backoff();
    tokio::pin!(stream);
    let mut tracker = UnitTracker::new();
    let mut ready = Some(ready);

    info!(namespace = %namespace, "Watching execution units");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Unit watch cancelled");
                break;
            }
            event = stream.next() => {
                match event {
                    Some(Ok(event)) => {
                        let synced = matches!(event, Event::InitDone);
                        forward(&completion, tracker.observe(event));
                        if synced {
                            if let Some(ready) = ready.take() {
                                info!("Initial unit listing complete");
                                let _ = ready.send(());
                            }
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Unit watch error, backing off"),
                    None => {
                        warn!("Unit watch stream ended");
                        break;
                    }
                }
            }
        }
    }
}
