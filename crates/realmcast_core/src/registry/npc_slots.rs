//! # NPC Slot Arena
//!
//! A dense array of NPC slots plus an ordered set of deleted (reusable)
//! indices. Both live under ONE lock in the registry: the array and the free
//! set are only ever mutated together.
//!
//! ```text
//! slots:   [ A ][ - ][ C ][ - ][ E ][ - ][ - ]
//!                 ^         ^    ^
//!             deleted   deleted  last_non_null = 4
//! ```
//!
//! Invariants:
//! - the array never shrinks
//! - `last_non_null` is the highest occupied index, or -1 when empty
//! - every deleted index is below `last_non_null`

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entity::{EntityId, Living};

/// Slot storage. Not synchronized on its own.
#[derive(Debug, Default)]
pub(crate) struct NpcSlots {
    slots: Vec<Option<Arc<Living>>>,
    deleted: BTreeSet<usize>,
    last_non_null: isize,
}

impl NpcSlots {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            deleted: BTreeSet::new(),
            last_non_null: -1,
        }
    }

    /// Stores `npc` in the lowest free slot and returns the index.
    pub(crate) fn insert(&mut self, npc: Arc<Living>) -> usize {
        let index = match self.deleted.pop_first() {
            Some(index) => index,
            None => (self.last_non_null + 1) as usize,
        };

        if index == self.slots.len() {
            self.slots.push(None);
        }
        npc.set_npc_slot(Some(index));
        self.slots[index] = Some(npc);

        if index as isize > self.last_non_null {
            self.last_non_null = index as isize;
        }
        index
    }

    /// Clears the slot held by `id`. Returns false if it was not there.
    pub(crate) fn remove(&mut self, index: usize, id: EntityId) -> bool {
        let holds_entity = self
            .slots
            .get(index)
            .and_then(Option::as_ref)
            .is_some_and(|npc| npc.id() == id);
        if !holds_entity {
            return false;
        }

        if let Some(npc) = self.slots[index].take() {
            npc.set_npc_slot(None);
        }

        if index as isize == self.last_non_null {
            // Walk down to the next occupied slot; holes above it are now
            // beyond the end and get reused by appending.
            let new_last = self.slots[..index]
                .iter()
                .rposition(Option::is_some)
                .map_or(-1, |i| i as isize);
            self.last_non_null = new_last;
            self.deleted.retain(|&i| (i as isize) < new_last);
        } else {
            self.deleted.insert(index);
        }
        true
    }

    pub(crate) fn get(&self, index: usize) -> Option<Arc<Living>> {
        self.slots.get(index).and_then(Clone::clone)
    }

    pub(crate) fn last_non_null(&self) -> isize {
        self.last_non_null
    }

    pub(crate) fn occupied(&self) -> Vec<Arc<Living>> {
        let end = (self.last_non_null + 1) as usize;
        self.slots[..end].iter().flatten().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, LivingState};

    fn npc(id: u64) -> Arc<Living> {
        Arc::new(Living::new(EntityId(id), EntityKind::Npc, "npc", LivingState::default()))
    }

    #[test]
    fn test_append_then_reuse_lowest() {
        let mut slots = NpcSlots::with_capacity(8);
        let npcs: Vec<_> = (0..5).map(npc).collect();
        for (i, n) in npcs.iter().enumerate() {
            assert_eq!(slots.insert(Arc::clone(n)), i);
        }
        assert!(slots.remove(3, EntityId(3)));
        assert!(slots.remove(1, EntityId(1)));
        assert_eq!(slots.last_non_null(), 4);

        assert_eq!(slots.insert(npc(10)), 1);
        assert_eq!(slots.insert(npc(11)), 3);
        assert_eq!(slots.insert(npc(12)), 5);
        assert_eq!(slots.last_non_null(), 5);
    }

    #[test]
    fn test_remove_last_walks_down_past_holes() {
        let mut slots = NpcSlots::with_capacity(8);
        for i in 0..4 {
            slots.insert(npc(i));
        }
        slots.remove(1, EntityId(1));
        slots.remove(3, EntityId(3));
        // slot 2 is still occupied
        assert_eq!(slots.last_non_null(), 2);
        assert_eq!(slots.deleted_count(), 1);

        slots.remove(2, EntityId(2));
        assert_eq!(slots.last_non_null(), 0);
        assert_eq!(slots.deleted_count(), 0);
        assert_eq!(slots.len(), 4);

        slots.remove(0, EntityId(0));
        assert_eq!(slots.last_non_null(), -1);
        assert_eq!(slots.insert(npc(20)), 0);
    }

    #[test]
    fn test_remove_wrong_entity_is_noop() {
        let mut slots = NpcSlots::with_capacity(2);
        slots.insert(npc(1));
        assert!(!slots.remove(0, EntityId(2)));
        assert!(!slots.remove(7, EntityId(1)));
        assert_eq!(slots.last_non_null(), 0);
    }
}
