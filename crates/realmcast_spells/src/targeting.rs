//! # Target Selection
//!
//! Turns a spell's [`TargetMode`] into the concrete list of affected entities.
//!
//! ## Scans
//!
//! ```text
//! SpatialIndex ──> candidates (snapshot) ──> chunked filter ──> merge
//!  players_near        Vec<Arc<Living>>      scoped workers     sort + dedup
//!  npcs_near                                 (above threshold)  by EntityId
//! ```
//!
//! Filtering only reads immutable spell data and entity state through short
//! read locks, so chunks run on scoped worker threads with no shared mutable
//! state. The merge sorts by id, which makes the result independent of worker
//! scheduling.

use std::sync::Arc;

use realmcast_core::{EntityId, EntityRegistry, Living, SpellDefinition, TargetMode};
use realmcast_shared::Vec3;

use crate::events::SpellEvent;
use crate::resolver::spell_range;
use crate::world::World;

// =============================================================================
// Collaborator traits
// =============================================================================

/// Spatial queries over registered entities.
pub trait SpatialIndex: Send + Sync {
    /// Players within `radius` of `center`.
    fn players_near(&self, registry: &EntityRegistry, center: Vec3, radius: f32) -> Vec<Arc<Living>>;

    /// NPCs (and structures) within `radius` of `center`.
    fn npcs_near(&self, registry: &EntityRegistry, center: Vec3, radius: f32) -> Vec<Arc<Living>>;
}

/// Linear scan over registry snapshots.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegistryScan;

impl SpatialIndex for RegistryScan {
    fn players_near(&self, registry: &EntityRegistry, center: Vec3, radius: f32) -> Vec<Arc<Living>> {
        registry.players().into_iter().filter(|p| p.is_active() && center.within(p.position(), radius)).collect()
    }

    fn npcs_near(&self, registry: &EntityRegistry, center: Vec3, radius: f32) -> Vec<Arc<Living>> {
        registry.npcs().into_iter().filter(|n| n.is_active() && center.within(n.position(), radius)).collect()
    }
}

/// "Can this attack that" rule.
pub trait Hostility: Send + Sync {
    /// `true` if `attacker` may use harmful spells on `defender`.
    fn is_allowed_to_attack(&self, attacker: &Living, defender: &Living) -> bool;
}

/// Realm rules: different realms fight, nobody attacks itself or its own pet.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealmHostility;

impl Hostility for RealmHostility {
    fn is_allowed_to_attack(&self, attacker: &Living, defender: &Living) -> bool {
        if attacker.id() == defender.id() {
            return false;
        }
        let (realm, pet, owner) = {
            let state = attacker.state();
            (state.realm, state.pet, state.owner)
        };
        let defender_state = defender.state();
        if !defender_state.alive || pet == Some(defender.id()) || owner == Some(defender.id()) {
            return false;
        }
        if defender_state.owner == Some(attacker.id()) {
            return false;
        }
        realm != defender_state.realm
    }
}

/// Line-of-sight predicate, answered synchronously.
pub trait LineOfSight: Send + Sync {
    /// `true` if `viewer` can see `target`.
    fn can_see(&self, viewer: &Living, target: &Living) -> bool;
}

/// No occluders: everything is visible.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenField;

impl LineOfSight for OpenField {
    fn can_see(&self, _viewer: &Living, _target: &Living) -> bool {
        true
    }
}

// =============================================================================
// Selector
// =============================================================================

/// Computes affected entities against a [`World`].
#[derive(Clone, Copy)]
pub struct TargetSelector<'w> {
    world: &'w World,
}

impl<'w> TargetSelector<'w> {
    /// Binds the selector to `world`.
    #[must_use]
    pub fn new(world: &'w World) -> Self {
        Self { world }
    }

    /// Entities affected by `spell` cast by `caster` at `target`.
    ///
    /// The result is sorted by id and free of duplicates.
    #[must_use]
    pub fn select(&self, caster: &Arc<Living>, spell: &SpellDefinition, target: Option<&Arc<Living>>) -> Vec<Arc<Living>> {
        let registry = self.world.registry();
        let mut mode = spell.target;
        let mut target = target.cloned();

        if mode == TargetMode::Pet && !spell.has_positive_effect() {
            mode = TargetMode::Enemy;
            target = caster.state().pet.and_then(|id| registry.get(id));
        }

        let selected = match mode {
            TargetMode::Area => self.area(caster, spell),
            TargetMode::Corpse => target.filter(|t| !t.is_alive()).into_iter().collect(),
            TargetMode::Pet => self.pets(caster, spell, target),
            TargetMode::BdSubPet => self.sub_pets(caster, spell),
            TargetMode::Enemy => self.enemies(caster, spell, target),
            TargetMode::Realm => self.friends(caster, spell, target),
            TargetMode::SelfOnly => {
                if spell.radius > 0.0 {
                    let center = self.center(caster, spell, target.as_ref());
                    self.scan(center, spell.radius, |l| !self.hostile(caster, l))
                } else {
                    vec![Arc::clone(caster)]
                }
            }
            TargetMode::Group => {
                let range = if spell.range <= 0.0 { spell.radius } else { self.range_of(caster, spell) };
                self.group_and_pets(caster, range)
            }
            TargetMode::Cone => self.cone(caster, spell),
        };
        merge(selected)
    }

    /// The caster's group (or the caster alone) with every pet and sub-pet in `range`.
    ///
    /// A pet without a group brings its owner; a pet whose owner is grouped
    /// uses the owner's group.
    #[must_use]
    pub fn group_and_pets(&self, caster: &Arc<Living>, range: f32) -> Vec<Arc<Living>> {
        let registry = self.world.registry();
        let origin = caster.position();
        let in_range = |living: &Living| origin.within(living.position(), range);
        let mut list = Vec::new();

        let mut group = caster.state().group;
        if group.is_none() {
            let owner = caster.owner().and_then(|id| registry.get(id)).filter(|o| o.is_player());
            if caster.is_player() {
                list.push(Arc::clone(caster));
                self.push_pets(caster, &in_range, &mut list);
            } else if let Some(owner) = owner {
                group = owner.state().group;
                if group.is_none() {
                    list.push(owner);
                    list.push(Arc::clone(caster));
                }
            } else {
                list.push(Arc::clone(caster));
            }
        }

        if let Some(group) = group {
            for member in self.world.groups().members(group).into_iter().filter_map(|id| registry.get(id)) {
                if in_range(&member) {
                    self.push_pets(&member, &in_range, &mut list);
                    list.push(member);
                }
            }
        }
        merge(list)
    }

    fn push_pets(&self, living: &Living, in_range: &impl Fn(&Living) -> bool, list: &mut Vec<Arc<Living>>) {
        let registry = self.world.registry();
        let Some(pet) = living.state().pet.and_then(|id| registry.get(id)) else {
            return;
        };
        let sub_pets = pet.state().sub_pets.clone();
        if in_range(&pet) {
            list.push(Arc::clone(&pet));
        }
        list.extend(sub_pets.into_iter().filter_map(|id| registry.get(id)).filter(|sub| in_range(sub)));
    }

    fn area(&self, caster: &Arc<Living>, spell: &SpellDefinition) -> Vec<Arc<Living>> {
        let ground = caster.state().ground_target;
        match ground {
            Some(center) if spell.radius > 0.0 => self.scan(center, spell.radius, |l| self.attackable(caster, l)),
            _ => Vec::new(),
        }
    }

    fn enemies(&self, caster: &Arc<Living>, spell: &SpellDefinition, target: Option<Arc<Living>>) -> Vec<Arc<Living>> {
        if spell.radius > 0.0 {
            let center = self.center(caster, spell, target.as_ref());
            return self.scan(center, spell.radius, |l| self.attackable(caster, l));
        }

        let Some(target) = target else {
            return Vec::new();
        };
        if !self.hostile(caster, &target) {
            return Vec::new();
        }
        if spell.range > 0.0 && self.blinded_to(caster, &target) {
            self.world.notify(SpellEvent::Message { to: caster.id(), text: format!("{} is invisible to you!", target.name()) });
            return Vec::new();
        }
        if target.state().damage_immune {
            return Vec::new();
        }
        vec![target]
    }

    fn friends(&self, caster: &Arc<Living>, spell: &SpellDefinition, target: Option<Arc<Living>>) -> Vec<Arc<Living>> {
        if spell.radius > 0.0 {
            let center = self.center(caster, spell, target.as_ref());
            let found = self.scan(center, spell.radius, |l| !self.hostile(caster, l));
            return found.into_iter().map(|l| self.shade_redirect(l, spell)).collect();
        }
        match target {
            Some(target) if !self.hostile(caster, &target) => vec![self.shade_redirect(target, spell)],
            _ => Vec::new(),
        }
    }

    fn pets(&self, caster: &Arc<Living>, spell: &SpellDefinition, target: Option<Arc<Living>>) -> Vec<Arc<Living>> {
        let registry = self.world.registry();
        let own_pet = caster.state().pet;
        let controls = |npc: &Living| {
            let owner = npc.owner();
            owner.is_some() && (owner == Some(caster.id()) || owner == own_pet)
        };

        if spell.radius > 0.0 && spell.range <= 0.0 {
            return self
                .world
                .spatial()
                .npcs_near(registry, caster.position(), spell.radius)
                .into_iter()
                .filter(|npc| controls(npc))
                .collect();
        }

        let origin = caster.position();
        let mut list = Vec::new();
        let mut body = target.filter(|t| t.is_npc() && controls(t) && origin.within(t.position(), spell.range));
        if body.is_none() {
            body = own_pet.and_then(|id| registry.get(id)).filter(|p| origin.within(p.position(), spell.range));
        }
        let Some(body) = body else {
            return list;
        };
        list.push(Arc::clone(&body));

        if spell.radius > 0.0 {
            let extra = self.world.spatial().npcs_near(registry, body.position(), spell.radius);
            list.extend(extra.into_iter().filter(|npc| npc.id() != body.id() && controls(npc)));
        }
        list
    }

    fn sub_pets(&self, caster: &Arc<Living>, spell: &SpellDefinition) -> Vec<Arc<Living>> {
        let registry = self.world.registry();
        if !caster.is_player() || spell.kind.is_heal() {
            return Vec::new();
        }
        let Some(body) = caster.state().pet.and_then(|id| registry.get(id)) else {
            return Vec::new();
        };
        let list: Vec<_> = self
            .world
            .spatial()
            .npcs_near(registry, body.position(), spell.radius)
            .into_iter()
            .filter(|npc| npc.owner() == Some(body.id()))
            .collect();
        if list.is_empty() {
            self.world.notify(SpellEvent::Message {
                to: caster.id(),
                text: "You don't have any subpet to cast this spell on!".into(),
            });
        }
        list
    }

    fn cone(&self, caster: &Arc<Living>, spell: &SpellDefinition) -> Vec<Arc<Living>> {
        let (origin, heading) = {
            let state = caster.state();
            (state.position, state.heading)
        };
        let width = spell.cone_width();
        self.scan(origin, spell.range, |l| {
            l.id() != caster.id()
                && origin.is_in_front(heading, l.position(), width)
                && self.hostile(caster, l)
                && !(l.is_npc() && l.state().damage_immune)
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Hostile, visible to the caster and not a damage-immune NPC.
    fn attackable(&self, caster: &Living, candidate: &Living) -> bool {
        if !self.hostile(caster, candidate) {
            return false;
        }
        if candidate.is_player() {
            !self.blinded_to(caster, candidate)
        } else {
            !candidate.state().damage_immune
        }
    }

    fn hostile(&self, caster: &Living, candidate: &Living) -> bool {
        self.world.hostility().is_allowed_to_attack(caster, candidate)
    }

    fn blinded_to(&self, caster: &Living, candidate: &Living) -> bool {
        caster.state().blinded_to == Some(candidate.id())
    }

    /// Radius spells centre on the target, or on the caster when there is no
    /// target or the spell is point blank.
    fn center(&self, caster: &Living, spell: &SpellDefinition, target: Option<&Arc<Living>>) -> Vec3 {
        match target {
            Some(target) if spell.range > 0.0 => target.position(),
            _ => caster.position(),
        }
    }

    fn range_of(&self, caster: &Living, spell: &SpellDefinition) -> f32 {
        spell_range(spell, caster.state().stats.spell_range_pct)
    }

    /// Shade-form players take non-buff effects on their pet body.
    fn shade_redirect(&self, living: Arc<Living>, spell: &SpellDefinition) -> Arc<Living> {
        if spell.kind.is_buff() || !living.is_player() {
            return living;
        }
        let (shade, pet) = {
            let state = living.state();
            (state.shade, state.pet)
        };
        if !shade {
            return living;
        }
        pet.and_then(|id| self.world.registry().get(id)).unwrap_or(living)
    }

    /// Players and NPCs around `center`, filtered in parallel above the
    /// configured threshold.
    fn scan<F>(&self, center: Vec3, radius: f32, keep: F) -> Vec<Arc<Living>>
    where
        F: Fn(&Living) -> bool + Sync,
    {
        let registry = self.world.registry();
        let spatial = self.world.spatial();
        let mut candidates = spatial.players_near(registry, center, radius);
        candidates.extend(spatial.npcs_near(registry, center, radius));

        let config = self.world.config();
        filter_parallel(candidates, config.parallel_scan_threshold, config.parallel_workers, &keep)
    }
}

/// Filters `candidates` with `keep`, splitting the work across scoped threads
/// when there are more than `threshold` of them.
pub fn filter_parallel<F>(candidates: Vec<Arc<Living>>, threshold: usize, workers: usize, keep: &F) -> Vec<Arc<Living>>
where
    F: Fn(&Living) -> bool + Sync,
{
    if candidates.len() <= threshold.max(1) || workers <= 1 {
        return candidates.into_iter().filter(|c| keep(c)).collect();
    }

    let chunk = candidates.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .chunks(chunk)
            .map(|part| scope.spawn(move || part.iter().filter(|c| keep(c)).cloned().collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
            .collect()
    })
}

/// Sorts by id and drops duplicates.
#[must_use]
pub fn merge(mut list: Vec<Arc<Living>>) -> Vec<Arc<Living>> {
    list.sort_unstable_by_key(|l| l.id());
    list.dedup_by_key(|l| l.id());
    list
}
