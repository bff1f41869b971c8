//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! The connection table

use crate::connection::Connection;
use crate::types::ConnectionId;
use std::collections::BTreeMap;
use tracing::debug;

/// Every live connection, keyed by id
///
/// Ids are allocated monotonically and never reused. Entries are removed only by
/// [`ConnectionTable::remove_closed`], after any close hook has run.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionTable {
    /// Create an empty table
    pub fn new() -> ConnectionTable {
        ConnectionTable::default()
    }

    /// Reserve the next connection id
    pub fn allocate_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId::new(self.next_id)
    }

    /// Add a connection under its own id
    pub fn insert(&mut self, connection: Connection) {
        self.connections.insert(connection.id(), connection);
    }

    /// Look up a connection
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Look up a connection mutably
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Whether `id` is in the table
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of connections, including closed ones awaiting removal
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of every id, in ascending order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Iterate over connections in id order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Iterate mutably over connections in id order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    /// Close draining connections whose output is flushed
    pub fn close_drained(&mut self) {
        for connection in self.connections.values_mut() {
            connection.finish_drain();
        }
    }

    /// Ids of connections closed since the last call, clearing their pending flag
    pub fn take_close_hooks(&mut self) -> Vec<ConnectionId> {
        self.connections
            .values_mut()
            .filter_map(|connection| connection.take_close_hook().then(|| connection.id()))
            .collect()
    }

    /// Remove closed connections whose close hook has been dispatched
    pub fn remove_closed(&mut self) -> usize {
        let before = self.connections.len();
        self.connections
            .retain(|_, connection| !connection.is_closed() || connection.close_hook_pending());
        let removed = before - self.connections.len();
        if removed > 0 {
            debug!("removed {removed} closed connections");
        }
        removed
    }
}
