//! Completion watcher for execution units
//!
//! The orchestrator blocks on a unit reaching a terminal phase while pod
//! lifecycle events arrive on a separate watch stream. The watcher routes
//! those events to the single waiter attached for the unit's identity:
//!
//! 1. The delegate registers a [`Waiter`] for the identity *before* it deletes
//!    stale units, so no deletion confirmation can be missed
//! 2. The watch pump calls [`CompletionWatcher::dispatch`] for every event
//! 3. The waiter drains its channel in delivery order, first until every stale
//!    unit is confirmed deleted, then until the new unit is terminal
//!
//! Dropping the waiter detaches it, whatever the outcome.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::crd::{ResourceIdentity, UnitPhase};
use crate::Error;

/// Lifecycle event of one execution unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitEvent {
    /// The unit was created or changed
    Applied {
        /// Unit (pod) name
        unit: String,
        /// Phase reported in the unit's status
        phase: UnitPhase,
    },
    /// The unit is gone
    Deleted {
        /// Unit (pod) name
        unit: String,
    },
}

impl UnitEvent {
    /// Name of the unit the event is about
    pub fn unit(&self) -> &str {
        match self {
            Self::Applied { unit, .. } | Self::Deleted { unit } => unit,
        }
    }
}

/// Error dispatching an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No waiter is attached for the identity
    NoWaiter,
    /// The waiter went away while the event was in flight
    ReceiverDropped,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::NoWaiter => write!(f, "no waiter attached for this identity"),
            DispatchError::ReceiverDropped => write!(f, "receiver dropped"),
        }
    }
}

impl std::error::Error for DispatchError {}

struct Attached {
    token: u64,
    sender: mpsc::UnboundedSender<UnitEvent>,
}

/// Routes unit lifecycle events to the waiter attached for each identity
#[derive(Default)]
pub struct CompletionWatcher {
    pending: DashMap<ResourceIdentity, Attached>,
    next_token: AtomicU64,
}

impl CompletionWatcher {
    /// Create a watcher with no waiters attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a waiter for `identity`.
    ///
    /// At most one waiter may be attached per identity; a second registration
    /// is a synchronization fault.
    pub fn register(&self, identity: &ResourceIdentity) -> Result<Waiter<'_>, Error> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(identity.clone()) {
            Entry::Occupied(_) => Err(Error::synchronization(
                identity.to_string(),
                "a waiter is already attached for this identity",
            )),
            Entry::Vacant(slot) => {
                slot.insert(Attached { token, sender });
                debug!(identity = %identity, "Registered completion waiter");
                Ok(Waiter {
                    watcher: self,
                    identity: identity.clone(),
                    token,
                    receiver,
                })
            }
        }
    }

    /// Deliver an event to the waiter attached for `identity`
    pub fn dispatch(&self, identity: &ResourceIdentity, event: UnitEvent) -> Result<(), DispatchError> {
        let (token, sender) = match self.pending.get(identity) {
            Some(attached) => (attached.token, attached.sender.clone()),
            None => return Err(DispatchError::NoWaiter),
        };

        debug!(identity = %identity, event = ?event, "Dispatching unit event");
        self.deliver(identity, token, &sender, event)
    }

    /// Send on the channel of the waiter holding `token`. A closed channel
    /// detaches that waiter only; a waiter registered since is left alone.
    fn deliver(
        &self,
        identity: &ResourceIdentity,
        token: u64,
        sender: &mpsc::UnboundedSender<UnitEvent>,
        event: UnitEvent,
    ) -> Result<(), DispatchError> {
        if sender.send(event).is_err() {
            warn!(identity = %identity, "Completion waiter dropped its receiver");
            self.detach(identity, token);
            return Err(DispatchError::ReceiverDropped);
        }
        Ok(())
    }

    /// Detach every waiter. Attached waiters observe a closed channel.
    pub fn clear(&self) {
        let count = self.pending.len();
        if count > 0 {
            info!(count, "Detaching all completion waiters");
            self.pending.clear();
        }
    }

    /// Number of attached waiters
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when no waiter is attached
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    fn is_waiting(&self, identity: &ResourceIdentity) -> bool {
        self.pending.contains_key(identity)
    }

    fn detach(&self, identity: &ResourceIdentity, token: u64) {
        self.pending.remove_if(identity, |_, attached| attached.token == token);
    }
}

/// Receiving end attached for one identity; detaches on drop
pub struct Waiter<'a> {
    watcher: &'a CompletionWatcher,
    identity: ResourceIdentity,
    token: u64,
    receiver: mpsc::UnboundedReceiver<UnitEvent>,
}

impl Waiter<'_> {
    /// Identity this waiter is attached for
    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    /// Wait until a `Deleted` event has been seen for every unit in `stale`.
    ///
    /// Events for other units are ignored. Returns immediately when `stale`
    /// is empty.
    pub async fn await_removal(&mut self, stale: &[String], timeout: Duration) -> Result<(), Error> {
        let mut remaining: BTreeSet<&str> = stale.iter().map(String::as_str).collect();
        let deadline = Instant::now() + timeout;

        while !remaining.is_empty() {
            match self.next_event(deadline).await? {
                UnitEvent::Deleted { unit } => {
                    if remaining.remove(unit.as_str()) {
                        debug!(identity = %self.identity, unit = %unit, "Stale unit removed");
                    }
                }
                UnitEvent::Applied { .. } => {}
            }
        }
        Ok(())
    }

    /// Wait until `unit` reports a terminal phase and return it.
    ///
    /// Events for any other unit are ignored, including late deletion
    /// confirmations for stale units. The unit disappearing before it is
    /// terminal is a synchronization fault.
    pub async fn await_completion(&mut self, unit: &str, timeout: Duration) -> Result<UnitPhase, Error> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.next_event(deadline).await? {
                UnitEvent::Applied { unit: name, phase } if name == unit => {
                    if phase.is_terminal() {
                        return Ok(phase);
                    }
                    debug!(identity = %self.identity, unit, %phase, "Unit not yet terminal");
                }
                UnitEvent::Deleted { unit: name } if name == unit => {
                    return Err(Error::synchronization(
                        self.identity.to_string(),
                        format!("execution unit {unit} was deleted before reaching a terminal phase"),
                    ));
                }
                other => {
                    debug!(identity = %self.identity, unit = other.unit(), "Ignoring event for another unit");
                }
            }
        }
    }

    async fn next_event(&mut self, deadline: Instant) -> Result<UnitEvent, Error> {
        match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(Error::synchronization(
                self.identity.to_string(),
                "completion waiter was detached",
            )),
            Err(_) => Err(Error::synchronization(
                self.identity.to_string(),
                "timed out waiting for execution unit events",
            )),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.watcher.detach(&self.identity, self.token);
    }
}
