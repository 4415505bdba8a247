//! Per-type entity sets ("ad hoc components").
//!
//! A marker type `T` names a set of entities, e.g. "everyone currently
//! channeling". Each set has its own lock; the outer map only takes its write
//! lock the first time a type is seen.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entity::EntityId;

type Set = Arc<Mutex<HashSet<EntityId>>>;

#[derive(Debug, Default)]
pub(crate) struct ComponentSets {
    sets: RwLock<HashMap<TypeId, Set>>,
}

impl ComponentSets {
    fn set_for(&self, kind: TypeId) -> Set {
        if let Some(set) = self.sets.read().get(&kind) {
            return Arc::clone(set);
        }
        Arc::clone(self.sets.write().entry(kind).or_default())
    }

    pub(crate) fn add(&self, kind: TypeId, entity: EntityId) {
        self.set_for(kind).lock().insert(entity);
    }

    pub(crate) fn remove(&self, kind: TypeId, entity: EntityId) {
        let set = self.sets.read().get(&kind).cloned();
        if let Some(set) = set {
            set.lock().remove(&entity);
        }
    }

    pub(crate) fn contains(&self, kind: TypeId, entity: EntityId) -> bool {
        let set = self.sets.read().get(&kind).cloned();
        set.is_some_and(|set| set.lock().contains(&entity))
    }

    pub(crate) fn snapshot(&self, kind: TypeId) -> Vec<EntityId> {
        let set = self.sets.read().get(&kind).cloned();
        let mut ids: Vec<EntityId> = set.map(|set| set.lock().iter().copied().collect()).unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn remove_everywhere(&self, entity: EntityId) {
        let sets: Vec<Set> = self.sets.read().values().cloned().collect();
        for set in sets {
            set.lock().remove(&entity);
        }
    }
}
