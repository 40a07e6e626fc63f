//! Id-indexed arena of an acceptor's validated connections.
//!
//! Messages and application code refer to connections by [`ConnectionId`], never
//! by live handle. Looking up an id whose connection has been evicted yields
//! `None`. Ids increase monotonically from a configurable base and are never
//! reused for the lifetime of the registry; once `u32::MAX` has been handed out
//! the registry refuses further admissions.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::envelope::MessageKind;
use crate::protocol::connection::{Connection, ConnectionId};

struct Slots<T> {
    /// `None` once every id has been used.
    next_id: Option<ConnectionId>,
    connections: BTreeMap<ConnectionId, Arc<Connection<T>>>,
}

pub struct Registry<T> {
    slots: Mutex<Slots<T>>,
}

impl<T: MessageKind> Registry<T> {
    pub fn new(first_id: ConnectionId) -> Self {
        Self {
            slots: Mutex::new(Slots {
                next_id: Some(first_id),
                connections: BTreeMap::new(),
            }),
        }
    }

    /// Assign the next id to `conn` and insert it.
    ///
    /// Returns `None`, leaving `conn` untouched, once the id space is exhausted.
    pub fn admit(&self, conn: &Arc<Connection<T>>) -> Option<ConnectionId> {
        let mut slots = self.slots.lock();
        let id = slots.next_id?;
        slots.next_id = id.checked_add(1);
        conn.assign_id(id);
        slots.connections.insert(id, Arc::clone(conn));
        Some(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection<T>>> {
        self.slots.lock().connections.get(&id).cloned()
    }

    /// Remove an entry. Returns it only to the first caller, so a disconnect
    /// notification keyed on the return value fires once.
    pub fn evict(&self, id: ConnectionId) -> Option<Arc<Connection<T>>> {
        self.slots.lock().connections.remove(&id)
    }

    /// Remove every listed id in one pass.
    pub fn evict_all(&self, ids: &[ConnectionId]) -> Vec<Arc<Connection<T>>> {
        let mut slots = self.slots.lock();
        ids.iter()
            .filter_map(|id| slots.connections.remove(id))
            .collect()
    }

    /// Point-in-time copy of the entries in id order.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<Connection<T>>)> {
        self.slots
            .lock()
            .connections
            .iter()
            .map(|(id, conn)| (*id, Arc::clone(conn)))
            .collect()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.slots.lock().connections.keys().copied().collect()
    }

    /// Entries, including closed ones not yet evicted.
    pub fn len(&self) -> usize {
        self.slots.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open_count(&self) -> usize {
        self.slots
            .lock()
            .connections
            .values()
            .filter(|conn| conn.is_open())
            .count()
    }

    /// Empty the registry, handing back whatever it held.
    pub fn drain(&self) -> Vec<Arc<Connection<T>>> {
        std::mem::take(&mut self.slots.lock().connections)
            .into_values()
            .collect()
    }
}
