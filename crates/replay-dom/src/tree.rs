//! DOM Tree (generational arena)
//!
//! Slots are reused after a node is dropped; every reuse bumps the slot
//! generation so that keys handed out earlier stop resolving.

use crate::node::Node;
use crate::NodeKey;

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena-based DOM tree
#[derive(Debug, Default)]
pub(crate) struct DomTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl DomTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node, reusing a free slot when one exists
    pub fn insert(&mut self, node: Node) -> NodeKey {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeKey {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeKey {
            index,
            generation: 0,
        }
    }

    /// Get a node if the key is still live
    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.node.as_ref()
    }

    /// Get a mutable node if the key is still live
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// Free a slot. The generation bump invalidates every outstanding key.
    pub fn remove(&mut self, key: NodeKey) -> Option<Node> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.live -= 1;
        Some(node)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.live
    }
}
