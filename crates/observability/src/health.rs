//! HealthRegistry - connection health of the source and every sink
//!
//! Connectors report transitions through a cloned `HealthRegistry` handed to
//! them at construction. Consumers such as a status display get a
//! `HealthReader`, which can only take snapshots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use contracts::ConnectionState;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::metrics::record_connection_state;

/// Capacity of the transition broadcast
const TRANSITION_CHANNEL_CAPACITY: usize = 256;

/// Health of one connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEntry {
    /// Current state
    pub state: ConnectionState,

    /// Most recent error reported for this connection
    pub last_error: Option<String>,

    /// Last transition or I/O activity
    pub last_activity: Option<DateTime<Utc>>,

    /// Time of the last state change
    pub since: DateTime<Utc>,

    /// Number of state changes since registration
    pub transitions: u64,
}

impl HealthEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            last_activity: None,
            since: now,
            transitions: 0,
        }
    }
}

/// One state change, as broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub id: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Point-in-time copy of the whole registry
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub entries: BTreeMap<String, HealthEntry>,
}

impl HealthSnapshot {
    pub fn get(&self, id: &str) -> Option<&HealthEntry> {
        self.entries.get(id)
    }

    /// State of `id`, `None` if the id was never configured
    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.entries.get(id).map(|entry| entry.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HealthEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of connections currently Connected
    pub fn connected_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state == ConnectionState::Connected)
            .count()
    }
}

#[derive(Debug)]
struct Inner {
    entries: Mutex<BTreeMap<String, HealthEntry>>,
    transitions: broadcast::Sender<Transition>,
}

/// Process-wide connection health
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    inner: Arc<Inner>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(BTreeMap::new()),
                transitions,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, HealthEntry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a Disconnected entry for `id` if it does not exist yet
    pub fn register(&self, id: &str) {
        let now = Utc::now();
        let inserted = {
            let mut entries = self.entries();
            if entries.contains_key(id) {
                false
            } else {
                entries.insert(id.to_string(), HealthEntry::new(now));
                true
            }
        };
        if inserted {
            record_connection_state(id, ConnectionState::Disconnected);
        }
    }

    /// Record a state report for `id`
    ///
    /// The entry is created on first report. `error` replaces `last_error`
    /// when present.
    pub fn report(&self, id: &str, state: ConnectionState, error: Option<String>) {
        let now = Utc::now();
        let transition = {
            let mut entries = self.entries();
            let entry = entries
                .entry(id.to_string())
                .or_insert_with(|| HealthEntry::new(now));
            let from = entry.state;
            entry.last_activity = Some(now);
            if error.is_some() {
                entry.last_error = error.clone();
            }
            if from == state {
                None
            } else {
                entry.state = state;
                entry.since = now;
                entry.transitions += 1;
                Some(Transition {
                    id: id.to_string(),
                    from,
                    to: state,
                    error,
                    at: now,
                })
            }
        };

        if let Some(transition) = transition {
            debug!(
                id = %transition.id,
                from = %transition.from,
                to = %transition.to,
                error = ?transition.error,
                "Connection state changed"
            );
            record_connection_state(id, state);
            // No receivers is fine.
            let _ = self.inner.transitions.send(transition);
        }
    }

    /// Record I/O activity without a state change
    pub fn touch(&self, id: &str) {
        let now = Utc::now();
        if let Some(entry) = self.entries().get_mut(id) {
            entry.last_activity = Some(now);
        }
    }

    /// Drop the entry of an id that is no longer configured
    pub fn forget(&self, id: &str) {
        self.entries().remove(id);
    }

    /// Current state of one connection
    pub fn state(&self, id: &str) -> Option<ConnectionState> {
        self.entries().get(id).map(|entry| entry.state)
    }

    /// Immutable copy of all entries
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            entries: self.entries().clone(),
        }
    }

    /// Stream of state changes reported after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.inner.transitions.subscribe()
    }

    /// Read-only accessor for external consumers
    pub fn reader(&self) -> HealthReader {
        HealthReader {
            registry: self.clone(),
        }
    }
}

/// Read-only view of a `HealthRegistry`
#[derive(Debug, Clone)]
pub struct HealthReader {
    registry: HealthRegistry,
}

impl HealthReader {
    pub fn snapshot(&self) -> HealthSnapshot {
        self.registry.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<HealthEntry> {
        self.registry.entries().get(id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.registry.subscribe()
    }
}
