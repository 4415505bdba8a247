//! # Entity Registry
//!
//! The single source of truth for which entities and effects exist.
//!
//! ## Collections and Locks
//!
//! ```text
//! EntityRegistry
//! ├─ npcs:       Mutex<NpcSlots>              slot array + free set, ONE lock
//! ├─ players:    Mutex<Vec<Arc<Living>>>      no iteration order
//! ├─ effects:    Mutex<Vec<Arc<ActiveEffect>>> global list for expiry sweeps
//! ├─ components: per-type sets, each with its own lock
//! └─ index:      RwLock<HashMap<EntityId, Arc<Living>>>  handle lookup
//! ```
//!
//! Every operation is safe to call from any thread and none of them fail:
//! unknown ids and indices are no-ops or empty results. Readers get
//! snapshots (`Vec<Arc<_>>`), never a held lock.

mod components;
mod npc_slots;

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::effect::{ActiveEffect, EffectId};
use crate::entity::{EntityId, EntityKind, Living, LivingState};

use components::ComponentSets;
use npc_slots::NpcSlots;

/// Registry statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connected players.
    pub players: usize,
    /// Occupied NPC slots.
    pub npcs: usize,
    /// Allocated NPC slots (never shrinks).
    pub npc_slots: usize,
    /// Reusable NPC slots.
    pub free_npc_slots: usize,
    /// Live effects.
    pub effects: usize,
}

/// Thread-safe registry of players, NPCs, effects and component sets.
#[derive(Debug)]
pub struct EntityRegistry {
    next_id: AtomicU64,
    npcs: Mutex<NpcSlots>,
    players: Mutex<Vec<Arc<Living>>>,
    effects: Mutex<Vec<Arc<ActiveEffect>>>,
    components: ComponentSets,
    index: RwLock<HashMap<EntityId, Arc<Living>>>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EntityRegistry {
    /// Creates a registry with room for `npc_capacity` NPC slots up front.
    #[must_use]
    pub fn new(npc_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            npcs: Mutex::new(NpcSlots::with_capacity(npc_capacity)),
            players: Mutex::new(Vec::new()),
            effects: Mutex::new(Vec::new()),
            components: ComponentSets::default(),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Hands out a fresh, never reused entity id.
    pub fn allocate_id(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocates an id and builds a living with it. Does not register it.
    #[must_use]
    pub fn create(&self, kind: EntityKind, name: &str, state: LivingState) -> Arc<Living> {
        Arc::new(Living::new(self.allocate_id(), kind, name, state))
    }

    // =========================================================================
    // NPCs
    // =========================================================================

    /// Registers an NPC (or structure) in the lowest free slot.
    ///
    /// Returns the slot index. An entity that already holds a slot keeps it.
    pub fn add_npc(&self, npc: Arc<Living>) -> usize {
        let id = npc.id();
        let mut slots = self.npcs.lock();
        if let Some(existing) = npc.npc_slot() {
            return existing;
        }
        let index = slots.insert(Arc::clone(&npc));
        // Indexed before the slot lock drops, so a slot is never visible unindexed.
        self.index.write().insert(id, npc);
        drop(slots);
        tracing::debug!("npc {} registered in slot {}", id, index);
        index
    }

    /// Clears an NPC's slot and makes it reusable. Unknown NPCs are ignored.
    pub fn remove_npc(&self, npc: &Living) {
        let Some(index) = npc.npc_slot() else {
            return;
        };
        let removed = {
            let mut slots = self.npcs.lock();
            let removed = slots.remove(index, npc.id());
            if removed {
                self.index.write().remove(&npc.id());
            }
            removed
        };
        if removed {
            self.components.remove_everywhere(npc.id());
            tracing::debug!("npc {} left slot {}", npc.id(), index);
        }
    }

    /// NPC currently in `index`.
    #[must_use]
    pub fn npc_at(&self, index: usize) -> Option<Arc<Living>> {
        self.npcs.lock().get(index)
    }

    /// Highest occupied NPC slot, or -1 when there are none.
    #[must_use]
    pub fn last_non_null_npc_index(&self) -> isize {
        self.npcs.lock().last_non_null()
    }

    /// Snapshot of all registered NPCs, in slot order.
    #[must_use]
    pub fn npcs(&self) -> Vec<Arc<Living>> {
        self.npcs.lock().occupied()
    }

    // =========================================================================
    // Players
    // =========================================================================

    /// Registers a player. Adding the same player twice is a no-op.
    pub fn add_player(&self, player: Arc<Living>) {
        let id = player.id();
        {
            let mut players = self.players.lock();
            if players.iter().any(|p| p.id() == id) {
                return;
            }
            players.push(Arc::clone(&player));
        }
        self.index.write().insert(id, player);
        tracing::info!("player {} registered", id);
    }

    /// Unregisters a player. Unknown players are ignored.
    pub fn remove_player(&self, player: &Living) {
        let id = player.id();
        let removed = {
            let mut players = self.players.lock();
            match players.iter().position(|p| p.id() == id) {
                Some(pos) => {
                    players.swap_remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.index.write().remove(&id);
            self.components.remove_everywhere(id);
            tracing::info!("player {} unregistered", id);
        }
    }

    /// Snapshot of connected players (unordered).
    #[must_use]
    pub fn players(&self) -> Vec<Arc<Living>> {
        self.players.lock().clone()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolves a handle to a registered entity.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<Arc<Living>> {
        self.index.read().get(&id).cloned()
    }

    /// Snapshot of every registered entity, sorted by id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Living>> {
        let mut all: Vec<_> = self.index.read().values().cloned().collect();
        all.sort_unstable_by_key(|l| l.id());
        all
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Tracks an effect in the global list.
    pub fn add_effect(&self, effect: Arc<ActiveEffect>) {
        self.effects.lock().push(effect);
    }

    /// Stops tracking an effect. Unknown effects are ignored.
    pub fn remove_effect(&self, id: EffectId) {
        let mut effects = self.effects.lock();
        if let Some(pos) = effects.iter().position(|e| e.id() == id) {
            effects.swap_remove(pos);
        }
    }

    /// Snapshot of the global effect list.
    #[must_use]
    pub fn effects(&self) -> Vec<Arc<ActiveEffect>> {
        self.effects.lock().clone()
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Adds `entity` to the set named by `T`.
    pub fn add_component<T: 'static>(&self, entity: EntityId) {
        self.components.add(TypeId::of::<T>(), entity);
    }

    /// Removes `entity` from the set named by `T`. Absent entries are a no-op.
    pub fn remove_component<T: 'static>(&self, entity: EntityId) {
        self.components.remove(TypeId::of::<T>(), entity);
    }

    /// True if `entity` is in the set named by `T`.
    #[must_use]
    pub fn has_component<T: 'static>(&self, entity: EntityId) -> bool {
        self.components.contains(TypeId::of::<T>(), entity)
    }

    /// Snapshot of the set named by `T`, sorted by id. Empty if never used.
    #[must_use]
    pub fn get_by_component<T: 'static>(&self) -> Vec<EntityId> {
        self.components.snapshot(TypeId::of::<T>())
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let (npcs, npc_slots, free_npc_slots) = {
            let slots = self.npcs.lock();
            (slots.occupied().len(), slots.len(), slots.deleted_count())
        };
        RegistryStats {
            players: self.players.lock().len(),
            npcs,
            npc_slots,
            free_npc_slots,
            effects: self.effects.lock().len(),
        }
    }
}
