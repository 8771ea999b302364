//! Vdev Tree
//!
//! A pool's redundancy hierarchy stored as an arena. Parent and child links
//! are indices into the arena, so walking up to a parent is a lookup rather
//! than a back-pointer. Trees are built fresh from every topology query and
//! are never cached across routing calls.

use crate::domain::guid::{PoolGuid, VdevGuid};
use crate::vdev::state::VdevState;
use serde::{Deserialize, Serialize};

// =============================================================================
// Vdev
// =============================================================================

/// One device (or interior grouping) in a pool's redundancy tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vdev {
    /// GUID of this vdev
    pub guid: VdevGuid,
    /// GUID of the owning pool
    pub pool_guid: PoolGuid,
    /// Vdev type (disk, file, mirror, raidz, spare, root)
    pub vdev_type: String,
    /// Current health state
    pub state: VdevState,
    /// Device node path (e.g., /dev/da1)
    pub path: Option<String>,
    /// Physical slot path (enclosure/bay)
    pub phys_path: Option<String>,
    /// Whether this leaf is a hot spare
    pub is_spare: bool,
}

impl Vdev {
    /// Create a leaf disk vdev
    pub fn disk(pool_guid: PoolGuid, guid: VdevGuid, state: VdevState) -> Self {
        Self {
            guid,
            pool_guid,
            vdev_type: "disk".to_string(),
            state,
            path: None,
            phys_path: None,
            is_spare: false,
        }
    }

    /// Create an interior vdev of the given type
    pub fn interior(
        pool_guid: PoolGuid,
        guid: VdevGuid,
        vdev_type: &str,
        state: VdevState,
    ) -> Self {
        Self {
            guid,
            pool_guid,
            vdev_type: vdev_type.to_string(),
            state,
            path: None,
            phys_path: None,
            is_spare: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_phys_path(mut self, phys_path: impl Into<String>) -> Self {
        self.phys_path = Some(phys_path.into());
        self
    }

    pub fn spare(mut self) -> Self {
        self.is_spare = true;
        self
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Index of a node inside one `VdevTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(usize);

#[derive(Debug, Clone)]
struct Node {
    vdev: Vdev,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
}

/// Arena-backed vdev tree, rooted at the pool's root vdev
#[derive(Debug, Clone)]
pub struct VdevTree {
    nodes: Vec<Node>,
}

impl VdevTree {
    /// Create a tree containing only its root
    pub fn new(root: Vdev) -> Self {
        Self {
            nodes: vec![Node {
                vdev: root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeIndex {
        NodeIndex(0)
    }

    /// Append a child under `parent`, returning its index
    pub fn add_child(&mut self, parent: NodeIndex, vdev: Vdev) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        self.nodes.push(Node {
            vdev,
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(idx);
        }
        idx
    }

    pub fn get(&self, idx: NodeIndex) -> Option<&Vdev> {
        self.nodes.get(idx.0).map(|n| &n.vdev)
    }

    pub fn get_mut(&mut self, idx: NodeIndex) -> Option<&mut Vdev> {
        self.nodes.get_mut(idx.0).map(|n| &mut n.vdev)
    }

    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.nodes.get(idx.0).and_then(|n| n.parent)
    }

    pub fn children(&self, idx: NodeIndex) -> &[NodeIndex] {
        self.nodes
            .get(idx.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Visit every vdev below the root in pre-order.
    ///
    /// Stops at the first node for which `f` returns true and returns it.
    pub fn each<F>(&self, mut f: F) -> Option<NodeIndex>
    where
        F: FnMut(NodeIndex, &Vdev) -> bool,
    {
        let mut stack: Vec<NodeIndex> = self.children(self.root()).iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            let Some(node) = self.nodes.get(idx.0) else {
                continue;
            };
            if f(idx, &node.vdev) {
                return Some(idx);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Find a vdev by GUID
    pub fn find(&self, guid: VdevGuid) -> Option<NodeIndex> {
        self.each(|_, vdev| vdev.guid == guid)
    }

    /// Find a vdev by device path
    pub fn find_by_path(&self, path: &str) -> Option<NodeIndex> {
        self.each(|_, vdev| vdev.path.as_deref() == Some(path))
    }

    /// Unlink a node from its parent. The node stays in the arena but is no
    /// longer reachable from the root.
    pub fn detach(&mut self, idx: NodeIndex) -> bool {
        let Some(parent) = self.parent(idx) else {
            return false;
        };
        let removed = match self.nodes.get_mut(parent.0) {
            Some(node) => {
                let before = node.children.len();
                node.children.retain(|c| *c != idx);
                before != node.children.len()
            }
            None => false,
        };
        if let Some(node) = self.nodes.get_mut(idx.0) {
            node.parent = None;
        }
        removed
    }

    /// Indices of reachable leaves
    pub fn leaves(&self) -> Vec<NodeIndex> {
        let mut leaves = Vec::new();
        self.each(|idx, _| {
            if self.children(idx).is_empty() {
                leaves.push(idx);
            }
            false
        });
        leaves
    }
}

// =============================================================================
// Pool Topology
// =============================================================================

/// Live view of one pool, as returned by a topology query
#[derive(Debug, Clone)]
pub struct PoolTopology {
    /// Pool name
    pub name: String,
    /// Pool GUID
    pub guid: PoolGuid,
    /// Device tree
    pub tree: VdevTree,
}

impl PoolTopology {
    pub fn new(name: impl Into<String>, guid: PoolGuid, tree: VdevTree) -> Self {
        Self {
            name: name.into(),
            guid,
            tree,
        }
    }

    /// Look up a vdev by GUID and return a copy of it
    pub fn vdev(&self, guid: VdevGuid) -> Option<Vdev> {
        self.tree.find(guid).and_then(|idx| self.tree.get(idx)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PoolGuid {
        PoolGuid::new(42)
    }

    fn mirror_with_spare() -> (VdevTree, NodeIndex, NodeIndex) {
        let root = Vdev::interior(pool(), VdevGuid(1), "root", VdevState::Healthy);
        let mut tree = VdevTree::new(root);
        let mirror = tree.add_child(
            tree.root(),
            Vdev::interior(pool(), VdevGuid(2), "mirror", VdevState::Degraded),
        );
        tree.add_child(
            mirror,
            Vdev::disk(pool(), VdevGuid(3), VdevState::Healthy).with_path("/dev/da0"),
        );
        let spare_group = tree.add_child(
            mirror,
            Vdev::interior(pool(), VdevGuid(4), "spare", VdevState::Degraded),
        );
        tree.add_child(
            spare_group,
            Vdev::disk(pool(), VdevGuid(5), VdevState::Faulted).with_path("/dev/da1"),
        );
        let spare = tree.add_child(
            spare_group,
            Vdev::disk(pool(), VdevGuid(6), VdevState::Healthy)
                .with_path("/dev/da2")
                .spare(),
        );
        (tree, spare_group, spare)
    }

    #[test]
    fn test_each_is_preorder_and_skips_root() {
        let (tree, _, _) = mirror_with_spare();
        let mut order = Vec::new();
        tree.each(|_, vdev| {
            order.push(vdev.guid.get());
            false
        });
        assert_eq!(order, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_parent_is_index_lookup() {
        let (tree, spare_group, spare) = mirror_with_spare();
        assert_eq!(tree.parent(spare), Some(spare_group));
        assert_eq!(tree.children(spare_group).len(), 2);
        assert_eq!(tree.parent(tree.root()), None);
    }

    #[test]
    fn test_find() {
        let (tree, _, spare) = mirror_with_spare();
        assert_eq!(tree.find(VdevGuid(6)), Some(spare));
        assert_eq!(tree.find_by_path("/dev/da2"), Some(spare));
        assert_eq!(tree.find(VdevGuid(99)), None);
    }

    #[test]
    fn test_detach_unlinks_node() {
        let (mut tree, spare_group, spare) = mirror_with_spare();
        assert!(tree.detach(spare));
        assert_eq!(tree.children(spare_group).len(), 1);
        assert_eq!(tree.find(VdevGuid(6)), None);
        assert!(!tree.detach(spare));
    }

    #[test]
    fn test_leaves() {
        let (tree, _, _) = mirror_with_spare();
        let guids: Vec<u64> = tree
            .leaves()
            .into_iter()
            .filter_map(|idx| tree.get(idx))
            .map(|v| v.guid.get())
            .collect();
        assert_eq!(guids, vec![3, 5, 6]);
    }
}
