//! Node pool and queue implementations for pathfinding
//!

use crate::PolyRef;

bitflags::bitflags! {
    /// Node flags for pathfinding state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
        /// The parent is not adjacent; the segment to it was found by a raycast
        const PARENT_DETACHED = 0x04;
    }
}

/// Node index type
pub type NodeIndex = u16;

/// Largest number of nodes a pool can hold.
pub const MAX_POOL_NODES: usize = NodeIndex::MAX as usize;

/// Maximum search states tracked for one polygon
pub const MAX_STATES_PER_NODE: usize = 4;

/// Node in the pathfinding graph
#[derive(Debug, Clone)]
pub struct Node {
    /// Position of the node
    pub pos: [f32; 3],
    /// Cost from previous node to current node
    pub cost: f32,
    /// Total cost up to the node, including the heuristic
    pub total: f32,
    /// Index of the parent node
    pub parent: Option<NodeIndex>,
    /// Extra state information
    pub state: u8,
    /// Node flags
    pub flags: NodeFlags,
    /// Polygon ref the node corresponds to
    pub id: PolyRef,
}

impl Node {
    fn empty() -> Self {
        Self {
            pos: [0.0; 3],
            cost: 0.0,
            total: 0.0,
            parent: None,
            state: 0,
            flags: NodeFlags::empty(),
            id: PolyRef::NULL,
        }
    }
}

/// Fixed capacity node storage with lookup by polygon and state
///
/// Nodes are allocated in order and never freed individually; [`NodePool::clear`]
/// releases all of them at once.
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<Option<NodeIndex>>,
    next: Vec<Option<NodeIndex>>,
    max_nodes: usize,
    hash_size: usize,
    node_count: usize,
}

#[inline]
fn hash_ref(id: PolyRef) -> u32 {
    let mut a = id.id();
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a
}

impl NodePool {
    /// Creates a new node pool
    ///
    /// `hash_size` is rounded up to a power of two. `max_nodes` is capped at
    /// [`MAX_POOL_NODES`].
    pub fn new(max_nodes: usize, hash_size: usize) -> Self {
        let max_nodes = max_nodes.min(MAX_POOL_NODES);
        let hash_size = hash_size.max(1).next_power_of_two();
        Self {
            nodes: vec![Node::empty(); max_nodes],
            first: vec![None; hash_size],
            next: vec![None; max_nodes],
            max_nodes,
            hash_size,
            node_count: 0,
        }
    }

    /// Clears the node pool
    pub fn clear(&mut self) {
        self.first.fill(None);
        self.node_count = 0;
    }

    #[inline]
    fn bucket(&self, id: PolyRef) -> usize {
        hash_ref(id) as usize & (self.hash_size - 1)
    }

    /// Gets or allocates the node for a polygon and state.
    ///
    /// Returns `None` when the node is new and the pool is full.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        if let Some(idx) = self.find_node(id, state) {
            return Some(idx);
        }
        if self.node_count >= self.max_nodes {
            return None;
        }

        let idx = self.node_count as NodeIndex;
        self.node_count += 1;

        let node = &mut self.nodes[idx as usize];
        *node = Node::empty();
        node.id = id;
        node.state = state;

        let bucket = self.bucket(id);
        self.next[idx as usize] = self.first[bucket];
        self.first[bucket] = Some(idx);
        Some(idx)
    }

    /// Looks up an existing node.
    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        let mut cur = self.first[self.bucket(id)];
        while let Some(i) = cur {
            let node = &self.nodes[i as usize];
            if node.id == id && node.state == state {
                return Some(i);
            }
            cur = self.next[i as usize];
        }
        None
    }

    /// All nodes of a polygon, any state.
    pub fn find_nodes(&self, id: PolyRef) -> impl Iterator<Item = NodeIndex> + '_ {
        std::iter::successors(self.first[self.bucket(id)], move |&i| self.next[i as usize])
            .filter(move |&i| self.nodes[i as usize].id == id)
            .take(MAX_STATES_PER_NODE)
    }

    #[inline]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    /// Parent of a node, if it has one.
    #[inline]
    pub fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.nodes[idx as usize].parent
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn hash_size(&self) -> usize {
        self.hash_size
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }
}

/// Binary min-heap of node indices keyed by node total cost
#[derive(Debug)]
pub struct NodeQueue {
    heap: Vec<(f32, NodeIndex)>,
    capacity: usize,
}

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Node with the lowest total.
    pub fn top(&self) -> Option<NodeIndex> {
        self.heap.first().map(|&(_, idx)| idx)
    }

    /// Removes and returns the node with the lowest total.
    pub fn pop(&mut self) -> Option<NodeIndex> {
        let (_, top) = *self.heap.first()?;
        let last = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.trickle_down(0, last);
        }
        Some(top)
    }

    /// Adds a node. Returns false when the queue is full.
    pub fn push(&mut self, idx: NodeIndex, total: f32) -> bool {
        if self.heap.len() >= self.capacity {
            return false;
        }
        self.heap.push((total, idx));
        let i = self.heap.len() - 1;
        self.bubble_up(i, (total, idx));
        true
    }

    /// Re-sorts a node whose total went down.
    pub fn modify(&mut self, idx: NodeIndex, total: f32) {
        if let Some(i) = self.heap.iter().position(|&(_, n)| n == idx) {
            self.bubble_up(i, (total, idx));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn bubble_up(&mut self, mut i: usize, entry: (f32, NodeIndex)) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].0 <= entry.0 {
                break;
            }
            self.heap[i] = self.heap[parent];
            i = parent;
        }
        self.heap[i] = entry;
    }

    fn trickle_down(&mut self, mut i: usize, entry: (f32, NodeIndex)) {
        let count = self.heap.len();
        let mut child = i * 2 + 1;
        while child < count {
            if child + 1 < count && self.heap[child].0 > self.heap[child + 1].0 {
                child += 1;
            }
            self.heap[i] = self.heap[child];
            i = child;
            child = i * 2 + 1;
        }
        self.bubble_up(i, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pool() {
        let mut pool = NodePool::new(4, 3);
        assert_eq!(pool.hash_size(), 4);

        let a = pool.get_node(PolyRef::new(10), 0).expect("allocated");
        let b = pool.get_node(PolyRef::new(10), 1).expect("allocated");
        assert_ne!(a, b);
        assert_eq!(pool.get_node(PolyRef::new(10), 0), Some(a));
        assert_eq!(pool.find_node(PolyRef::new(10), 1), Some(b));
        assert_eq!(pool.find_nodes(PolyRef::new(10)).count(), 2);
        assert_eq!(pool.node_count(), 2);

        pool.get_node(PolyRef::new(11), 0).expect("allocated");
        pool.get_node(PolyRef::new(12), 0).expect("allocated");
        assert!(pool.get_node(PolyRef::new(13), 0).is_none());
        // Existing nodes are still found when the pool is full.
        assert_eq!(pool.get_node(PolyRef::new(11), 0).map(|i| pool.node(i).id), Some(PolyRef::new(11)));

        pool.clear();
        assert_eq!(pool.node_count(), 0);
        assert!(pool.find_node(PolyRef::new(10), 0).is_none());
        let c = pool.get_node(PolyRef::new(13), 0).expect("allocated");
        assert_eq!(pool.node(c).parent, None);
        assert_eq!(pool.node(c).flags, NodeFlags::empty());
    }

    #[test]
    fn test_node_queue() {
        let mut queue = NodeQueue::new(8);
        for (idx, total) in [(0, 5.0), (1, 1.0), (2, 3.0), (3, 4.0), (4, 2.0)] {
            assert!(queue.push(idx, total));
        }
        assert_eq!(queue.top(), Some(1));

        // Lowering a cost moves the node to the front.
        queue.modify(3, 0.5);
        let order: Vec<NodeIndex> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![3, 1, 4, 2, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_node_queue_full() {
        let mut queue = NodeQueue::new(1);
        assert!(queue.push(0, 1.0));
        assert!(!queue.push(1, 0.5));
        assert_eq!(queue.len(), 1);
    }
}
