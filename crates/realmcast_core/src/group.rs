//! Party membership.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::entity::EntityId;

/// Group identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// All parties, behind one lock. Reads vastly outnumber writes.
#[derive(Debug, Default)]
pub struct Groups {
    members: RwLock<HashMap<GroupId, Vec<EntityId>>>,
}

impl Groups {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entity` to `group`. Joining twice is a no-op.
    pub fn join(&self, group: GroupId, entity: EntityId) {
        let mut members = self.members.write();
        let list = members.entry(group).or_default();
        if !list.contains(&entity) {
            list.push(entity);
        }
    }

    /// Removes `entity` from `group`; empty groups disappear.
    pub fn leave(&self, group: GroupId, entity: EntityId) {
        let mut members = self.members.write();
        if let Some(list) = members.get_mut(&group) {
            list.retain(|&id| id != entity);
            if list.is_empty() {
                members.remove(&group);
            }
        }
    }

    /// Members of a group, in join order. Empty for unknown groups.
    #[must_use]
    pub fn members(&self, group: GroupId) -> Vec<EntityId> {
        self.members.read().get(&group).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave() {
        let groups = Groups::new();
        groups.join(GroupId(1), EntityId(10));
        groups.join(GroupId(1), EntityId(11));
        groups.join(GroupId(1), EntityId(10));
        assert_eq!(groups.members(GroupId(1)), vec![EntityId(10), EntityId(11)]);

        groups.leave(GroupId(1), EntityId(10));
        groups.leave(GroupId(1), EntityId(11));
        assert!(groups.members(GroupId(1)).is_empty());
        groups.leave(GroupId(9), EntityId(1));
    }
}
