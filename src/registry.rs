//! Node registry.
//!
//! Maps node identifiers to the handles used as node addresses on the bus,
//! together with each node's topic subscriptions and the time it was last
//! heard from.

use chrono::{DateTime, Utc};
use nocan::bitset::BITSET_LEN;
use nocan::{Bitset64, NodeHandle, NodeIdentifier, MAX_NODES};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("maximum number of nodes has been reached")]
    Full,
}

/// State of a registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    identifier: NodeIdentifier,
    last_seen: DateTime<Utc>,
    subscriptions: Bitset64,
}

impl NodeRecord {
    fn new(identifier: NodeIdentifier) -> Self {
        NodeRecord {
            identifier,
            last_seen: Utc::now(),
            subscriptions: Bitset64::new(),
        }
    }

    pub fn identifier(&self) -> &NodeIdentifier {
        &self.identifier
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn subscriptions(&self) -> Bitset64 {
        self.subscriptions
    }
}

/// Read-only view of a node handed to external layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeProperties {
    pub id: String,
    pub last_seen: DateTime<Utc>,
    pub subscriptions: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

struct Table {
    records: [Option<NodeRecord>; MAX_NODES],
    handles: HashMap<NodeIdentifier, NodeHandle>,
}

impl Table {
    fn record_mut(&mut self, handle: NodeHandle) -> Option<&mut NodeRecord> {
        self.records[handle.index()].as_mut()
    }
}

/// Bounded table of registered nodes.
///
/// Records and the identifier map are guarded by one lock, so they always
/// describe the same set of nodes.
pub struct NodeRegistry {
    table: Mutex<Table>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        NodeRegistry::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry {
            table: Mutex::new(Table {
                records: std::array::from_fn(|_| None),
                handles: HashMap::with_capacity(MAX_NODES),
            }),
        }
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.table.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, identifier: &NodeIdentifier) -> Option<NodeHandle> {
        self.table.lock().handles.get(identifier).copied()
    }

    /// Register a node, or return its handle if it is already registered.
    ///
    /// New nodes get the lowest free handle.
    pub fn register(&self, identifier: NodeIdentifier) -> Result<NodeHandle, RegistryError> {
        let mut table = self.table.lock();

        if let Some(&handle) = table.handles.get(&identifier) {
            return Ok(handle);
        }

        let free = table
            .records
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::Full)?;
        let handle = NodeHandle::try_from(free).map_err(|_| RegistryError::Full)?;

        table.records[free] = Some(NodeRecord::new(identifier));
        table.handles.insert(identifier, handle);

        info!(node = %handle, id = %identifier, "Registered node");
        Ok(handle)
    }

    /// Remove a node, returns `false` if the handle was not registered.
    pub fn unregister(&self, handle: NodeHandle) -> bool {
        let mut table = self.table.lock();

        match table.records[handle.index()].take() {
            Some(record) => {
                table.handles.remove(&record.identifier);
                info!(node = %handle, id = %record.identifier, "Unregistered node");
                true
            }
            None => false,
        }
    }

    /// Add the topics of an 8 byte wire mask to a node's subscriptions.
    ///
    /// Returns `false` if the mask has the wrong length or the node is not
    /// registered.
    pub fn subscribe(&self, handle: NodeHandle, topic_mask: &[u8]) -> bool {
        self.update_subscriptions(handle, topic_mask, Bitset64::add)
    }

    /// Remove the topics of an 8 byte wire mask from a node's subscriptions.
    pub fn unsubscribe(&self, handle: NodeHandle, topic_mask: &[u8]) -> bool {
        self.update_subscriptions(handle, topic_mask, Bitset64::subtract)
    }

    fn update_subscriptions(
        &self,
        handle: NodeHandle,
        topic_mask: &[u8],
        apply: fn(&mut Bitset64, Bitset64),
    ) -> bool {
        if topic_mask.len() != BITSET_LEN {
            debug!(node = %handle, len = topic_mask.len(), "Rejected topic mask");
            return false;
        }
        let Ok(mask) = Bitset64::try_from(topic_mask) else {
            return false;
        };

        match self.table.lock().record_mut(handle) {
            Some(record) => {
                apply(&mut record.subscriptions, mask);
                true
            }
            None => false,
        }
    }

    /// Mark a node as seen now, returns `false` if it is not registered.
    pub fn touch(&self, handle: NodeHandle) -> bool {
        match self.table.lock().record_mut(handle) {
            Some(record) => {
                record.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Copy of a node's state for external layers.
    pub fn snapshot(&self, handle: NodeHandle) -> Option<NodeProperties> {
        let table = self.table.lock();
        let record = table.records[handle.index()].as_ref()?;

        Some(NodeProperties {
            id: record.identifier.to_string(),
            last_seen: record.last_seen,
            subscriptions: record.subscriptions.iter().collect(),
            attributes: BTreeMap::new(),
        })
    }

    /// Visit every registered node in ascending handle order.
    ///
    /// The registry stays locked for the whole traversal; `visitor` must not
    /// call back into the registry.
    pub fn for_each(&self, mut visitor: impl FnMut(NodeHandle, &NodeRecord)) {
        let table = self.table.lock();

        for (index, record) in table.records.iter().enumerate() {
            if let (Some(record), Ok(handle)) = (record, NodeHandle::try_from(index)) {
                visitor(handle, record);
            }
        }
    }

    /// Nodes subscribed to `topic`, in ascending handle order.
    pub fn subscribers(&self, topic: u8) -> Vec<NodeHandle> {
        let mut handles = Vec::new();
        self.for_each(|handle, record| {
            if record.subscriptions.contains(topic) {
                handles.push(handle);
            }
        });
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier(n: u32) -> NodeIdentifier {
        let mut bytes = [0xA0, 0, 0, 0, 0, 0, 0, 0];
        bytes[4..].copy_from_slice(&n.to_be_bytes());
        NodeIdentifier::new(bytes)
    }

    fn handle(n: u8) -> NodeHandle {
        NodeHandle::try_from(n).unwrap()
    }

    fn subscriptions(registry: &NodeRegistry, handle: NodeHandle) -> Bitset64 {
        let mut set = None;
        registry.for_each(|h, record| {
            if h == handle {
                set = Some(record.subscriptions());
            }
        });
        set.unwrap()
    }

    #[test]
    fn register_is_idempotent() {
        let registry = NodeRegistry::new();

        let first = registry.register(identifier(1)).unwrap();
        let second = registry.register(identifier(1)).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&identifier(1)), Some(first));
        assert_eq!(registry.lookup(&identifier(2)), None);
    }

    #[test]
    fn capacity() {
        let registry = NodeRegistry::new();

        let mut handles = Vec::new();
        for n in 0..MAX_NODES as u32 {
            handles.push(registry.register(identifier(n)).unwrap());
        }
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), MAX_NODES);
        assert_eq!(handles.first(), Some(&handle(0)));
        assert_eq!(handles.last(), Some(&handle(127)));

        assert_eq!(registry.register(identifier(1000)), Err(RegistryError::Full));
        assert_eq!(registry.lookup(&identifier(1000)), None);
        assert_eq!(registry.len(), MAX_NODES);

        // already registered identifiers still resolve when full
        assert_eq!(registry.register(identifier(5)), Ok(handle(5)));
    }

    #[test]
    fn slot_reuse() {
        let registry = NodeRegistry::new();
        for n in 0..4 {
            registry.register(identifier(n)).unwrap();
        }

        assert!(registry.unregister(handle(2)));
        assert!(!registry.unregister(handle(2)));
        assert_eq!(registry.lookup(&identifier(2)), None);
        assert!(registry.snapshot(handle(2)).is_none());

        assert_eq!(registry.register(identifier(99)), Ok(handle(2)));
        assert_eq!(registry.register(identifier(100)), Ok(handle(4)));
        assert_eq!(registry.lookup(&identifier(2)), None);
    }

    #[test]
    fn lowest_free_slot() {
        let registry = NodeRegistry::new();
        for n in 0..6 {
            registry.register(identifier(n)).unwrap();
        }
        registry.unregister(handle(4));
        registry.unregister(handle(1));

        assert_eq!(registry.register(identifier(50)), Ok(handle(1)));
        assert_eq!(registry.register(identifier(51)), Ok(handle(4)));
    }

    #[test]
    fn subscription_algebra() {
        let registry = NodeRegistry::new();
        let node = registry.register(identifier(7)).unwrap();

        let a = Bitset64::from_bits(0x0000_00F0_0000_000F);
        let b = Bitset64::from_bits(0x8000_0030_0000_0101);

        assert!(registry.subscribe(node, &a.to_bytes()));
        assert!(registry.subscribe(node, &b.to_bytes()));
        assert_eq!(subscriptions(&registry, node).bits(), a.bits() | b.bits());

        assert!(registry.unsubscribe(node, &b.to_bytes()));
        assert_eq!(subscriptions(&registry, node).bits(), a.bits() & !b.bits());

        assert!(registry.subscribe(node, &[0; 8]));
        assert_eq!(subscriptions(&registry, node).bits(), a.bits() & !b.bits());
    }

    #[test]
    fn subscription_validation() {
        let registry = NodeRegistry::new();
        let node = registry.register(identifier(7)).unwrap();

        assert!(!registry.subscribe(node, &[0xFF; 7]));
        assert!(!registry.subscribe(node, &[0xFF; 9]));
        assert!(!registry.unsubscribe(node, &[]));
        assert!(subscriptions(&registry, node).is_empty());

        assert!(!registry.subscribe(handle(100), &[0xFF; 8]));
        assert!(!registry.unsubscribe(handle(100), &[0xFF; 8]));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = NodeRegistry::new();
        let id: NodeIdentifier = "01:02:03:04:05:06:07:08".parse().unwrap();
        let node = registry.register(id).unwrap();
        registry.subscribe(node, &[0b0000_0101, 0, 0, 0, 0, 0, 0, 0b1000_0000]);

        let props = registry.snapshot(node).unwrap();
        assert_eq!(props.id, "01:02:03:04:05:06:07:08");
        assert_eq!(props.subscriptions, vec![0, 2, 63]);
        assert!(props.attributes.is_empty());

        registry.unsubscribe(node, &[0xFF; 8]);
        assert_eq!(props.subscriptions, vec![0, 2, 63]);
        assert!(registry.snapshot(node).unwrap().subscriptions.is_empty());
    }

    #[test]
    fn touch_updates_last_seen() {
        let registry = NodeRegistry::new();
        let node = registry.register(identifier(3)).unwrap();
        let before = registry.snapshot(node).unwrap().last_seen;

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(registry.touch(node));
        assert!(registry.snapshot(node).unwrap().last_seen > before);

        assert!(!registry.touch(handle(50)));
        assert!(registry.snapshot(handle(50)).is_none());
    }

    #[test]
    fn for_each_in_handle_order() {
        let registry = NodeRegistry::new();
        for n in 0..5 {
            registry.register(identifier(n)).unwrap();
        }
        registry.unregister(handle(3));

        let mut seen = Vec::new();
        registry.for_each(|handle, record| seen.push((u8::from(handle), *record.identifier())));

        assert_eq!(
            seen,
            vec![
                (0, identifier(0)),
                (1, identifier(1)),
                (2, identifier(2)),
                (4, identifier(4)),
            ]
        );
    }

    #[test]
    fn subscribers_of_topic() {
        let registry = NodeRegistry::new();
        let a = registry.register(identifier(1)).unwrap();
        let b = registry.register(identifier(2)).unwrap();
        let c = registry.register(identifier(3)).unwrap();

        registry.subscribe(a, &Bitset64::from_bits(1 << 9).to_bytes());
        registry.subscribe(c, &Bitset64::from_bits(1 << 9 | 1 << 2).to_bytes());
        registry.subscribe(b, &Bitset64::from_bits(1 << 2).to_bytes());

        assert_eq!(registry.subscribers(9), vec![a, c]);
        assert_eq!(registry.subscribers(2), vec![b, c]);
        assert!(registry.subscribers(40).is_empty());
    }

    #[test]
    fn concurrent_registration() {
        let registry = std::sync::Arc::new(NodeRegistry::new());

        let threads: Vec<_> = (0..4u32)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..80 {
                        // half of the identifiers are shared between threads
                        let id = if n % 2 == 0 { identifier(n) } else { identifier(t * 1000 + n) };
                        let _ = registry.register(id);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        // 40 shared and 4 * 40 distinct identifiers, capped at the table size
        assert_eq!(registry.len(), MAX_NODES);

        let mut handles = std::collections::HashSet::new();
        registry.for_each(|handle, record| {
            assert!(handles.insert(handle));
            assert!(!record.identifier().as_bytes().iter().all(|&b| b == 0));
        });
        assert_eq!(handles.len(), MAX_NODES);
    }
}
