//! The record store the session layer consults: records of remote nodes and their liveness.
//!
//! The routing table that owns this information in a full discovery service is not part of this
//! crate. [`NodeStore`] is the interface the handlers need from it and [`MemoryNodeStore`] a plain
//! in-memory rendition.
use crate::{crypto, Enr};
use enr::NodeId;
use parking_lot::RwLock;
use std::{collections::HashMap, time::Instant};
use tracing::trace;

pub trait NodeStore: Send + Sync {
    /// The best known record of `node_id`.
    fn resolve(&self, node_id: &NodeId) -> Option<Enr>;

    /// Stores a record, unless a record with a higher sequence number is already known.
    fn save(&self, enr: Enr);

    /// Marks the node as having answered a request just now.
    fn update_liveness(&self, node_id: &NodeId);

    /// Up to `limit` records at log distance `distance` from `local_id`.
    fn nodes_at_distance(&self, local_id: &NodeId, distance: u64, limit: usize) -> Vec<Enr>;

    /// Every record in the store.
    fn known_nodes(&self) -> Vec<Enr>;
}

struct NodeEntry {
    enr: Enr,
    last_seen: Option<Instant>,
}

/// A [`NodeStore`] kept in memory.
#[derive(Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the node last answered a liveness-updating request.
    pub fn last_seen(&self, node_id: &NodeId) -> Option<Instant> {
        self.nodes.read().get(node_id).and_then(|entry| entry.last_seen)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeStore for MemoryNodeStore {
    fn resolve(&self, node_id: &NodeId) -> Option<Enr> {
        self.nodes.read().get(node_id).map(|entry| entry.enr.clone())
    }

    fn save(&self, enr: Enr) {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&enr.node_id()) {
            Some(entry) if entry.enr.seq() > enr.seq() => {
                trace!(
                    "Ignoring outdated ENR of {}, seq {} < {}",
                    enr.node_id(),
                    enr.seq(),
                    entry.enr.seq()
                );
            }
            Some(entry) => entry.enr = enr,
            None => {
                nodes.insert(
                    enr.node_id(),
                    NodeEntry {
                        enr,
                        last_seen: None,
                    },
                );
            }
        }
    }

    fn update_liveness(&self, node_id: &NodeId) {
        if let Some(entry) = self.nodes.write().get_mut(node_id) {
            entry.last_seen = Some(Instant::now());
        }
    }

    fn nodes_at_distance(&self, local_id: &NodeId, distance: u64, limit: usize) -> Vec<Enr> {
        self.nodes
            .read()
            .values()
            .filter(|entry| crypto::log_distance(local_id, &entry.enr.node_id()) == distance)
            .take(limit)
            .map(|entry| entry.enr.clone())
            .collect()
    }

    fn known_nodes(&self) -> Vec<Enr> {
        self.nodes
            .read()
            .values()
            .map(|entry| entry.enr.clone())
            .collect()
    }
}
