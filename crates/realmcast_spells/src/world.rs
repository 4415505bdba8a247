//! # World Context
//!
//! Everything a cast needs, passed explicitly instead of living in globals.
//!
//! ```text
//! World
//! ├─ registry     EntityRegistry (players, NPC slots, effects, components)
//! ├─ groups       party membership
//! ├─ spells       read-only SpellBook
//! ├─ config       SpellConfig
//! ├─ rng          dyn RandomSource
//! ├─ notifier     dyn Notifier (outbound events)
//! ├─ spatial      dyn SpatialIndex
//! ├─ hostility    dyn Hostility
//! ├─ sight        dyn LineOfSight
//! ├─ casts        per-caster cast slots
//! └─ attacks      attacked-hooks raised during resolution, drained per tick
//! ```
//!
//! Built once at startup with [`WorldBuilder`] and shared by reference for
//! the life of the simulation.

use std::sync::Arc;

use parking_lot::Mutex;
use realmcast_core::{EntityId, EntityKind, EntityRegistry, Groups, Living, LivingState, SpellBook};

use crate::config::SpellConfig;
use crate::events::{Notifier, NullNotifier, SpellEvent};
use crate::resolver::{CombatResolver, Combatant};
use crate::rng::{Dice, RandomSource};
use crate::scheduler::EffectScheduler;
use crate::session::CastSlots;
use crate::targeting::{Hostility, LineOfSight, OpenField, RealmHostility, RegistryScan, SpatialIndex, TargetSelector};

/// An attack reported by resolution, to be fed into the defender's cast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttackNotice {
    /// Entity that was hit.
    pub defender: EntityId,
    /// Entity that hit it.
    pub attacker: EntityId,
}

/// The simulation context.
pub struct World {
    registry: EntityRegistry,
    groups: Groups,
    spells: SpellBook,
    config: SpellConfig,
    rng: Box<dyn RandomSource>,
    notifier: Box<dyn Notifier>,
    spatial: Box<dyn SpatialIndex>,
    hostility: Box<dyn Hostility>,
    sight: Box<dyn LineOfSight>,
    casts: CastSlots,
    attacks: Mutex<Vec<AttackNotice>>,
}

impl World {
    /// Starts building a world with default collaborators.
    #[must_use]
    pub fn builder() -> WorldBuilder {
        WorldBuilder::default()
    }

    /// Entity registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Party membership.
    #[inline]
    #[must_use]
    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    /// Spell catalog.
    #[inline]
    #[must_use]
    pub fn spells(&self) -> &SpellBook {
        &self.spells
    }

    /// Tunables.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SpellConfig {
        &self.config
    }

    /// Random source.
    #[inline]
    #[must_use]
    pub fn rng(&self) -> &dyn RandomSource {
        self.rng.as_ref()
    }

    /// Spatial queries.
    #[inline]
    #[must_use]
    pub fn spatial(&self) -> &dyn SpatialIndex {
        self.spatial.as_ref()
    }

    /// Hostility rule.
    #[inline]
    #[must_use]
    pub fn hostility(&self) -> &dyn Hostility {
        self.hostility.as_ref()
    }

    /// Line-of-sight predicate.
    #[inline]
    #[must_use]
    pub fn sight(&self) -> &dyn LineOfSight {
        self.sight.as_ref()
    }

    /// Cast slots of every caster.
    #[inline]
    #[must_use]
    pub fn casts(&self) -> &CastSlots {
        &self.casts
    }

    /// Sends an outbound event.
    #[inline]
    pub fn notify(&self, event: SpellEvent) {
        self.notifier.notify(event);
    }

    /// Sends a chat-style message to one entity.
    pub fn message(&self, to: EntityId, text: impl Into<String>) {
        self.notifier.notify(SpellEvent::Message { to, text: text.into() });
    }

    /// Combat formulas bound to this world.
    #[must_use]
    pub fn resolver(&self) -> CombatResolver<'_> {
        CombatResolver::new(&self.config, self.rng.as_ref())
    }

    /// Target selection bound to this world.
    #[must_use]
    pub fn targets(&self) -> TargetSelector<'_> {
        TargetSelector::new(self)
    }

    /// Effect scheduling bound to this world.
    #[must_use]
    pub fn scheduler(&self) -> EffectScheduler<'_> {
        EffectScheduler::new(self)
    }

    /// Lock-free combat view of `living`.
    #[must_use]
    pub fn combatant(&self, living: &Living) -> Combatant {
        Combatant::of(&self.registry, living)
    }

    /// Creates and registers a player.
    pub fn spawn_player(&self, name: &str, state: LivingState) -> Arc<Living> {
        let player = self.registry.create(EntityKind::Player, name, state);
        self.registry.add_player(Arc::clone(&player));
        player
    }

    /// Creates and registers an NPC (or structure, by `kind`).
    pub fn spawn(&self, kind: EntityKind, name: &str, state: LivingState) -> Arc<Living> {
        let npc = self.registry.create(kind, name, state);
        self.registry.add_npc(Arc::clone(&npc));
        npc
    }

    /// Creates and registers an NPC.
    pub fn spawn_npc(&self, name: &str, state: LivingState) -> Arc<Living> {
        self.spawn(EntityKind::Npc, name, state)
    }

    /// Removes an entity from the world: its casts end, its effects and
    /// maintained effects are cancelled and it leaves the registry.
    pub fn despawn(&self, living: &Arc<Living>) {
        self.casts.forget(self, living.id());
        self.scheduler().release_all(living);
        if living.is_player() {
            self.registry.remove_player(living);
        } else {
            self.registry.remove_npc(living);
        }
        self.rng.forget(living.id());
    }

    /// Buffers an attacked-hook for the defender's cast.
    pub(crate) fn raise_attacked(&self, defender: EntityId, attacker: EntityId) {
        self.attacks.lock().push(AttackNotice { defender, attacker });
    }

    /// Takes every buffered attacked-hook, oldest first.
    pub fn take_attacks(&self) -> Vec<AttackNotice> {
        std::mem::take(&mut *self.attacks.lock())
    }
}

/// Builder for [`World`].
#[derive(Default)]
pub struct WorldBuilder {
    npc_capacity: Option<usize>,
    spells: SpellBook,
    config: SpellConfig,
    rng: Option<Box<dyn RandomSource>>,
    notifier: Option<Box<dyn Notifier>>,
    spatial: Option<Box<dyn SpatialIndex>>,
    hostility: Option<Box<dyn Hostility>>,
    sight: Option<Box<dyn LineOfSight>>,
}

impl WorldBuilder {
    /// Pre-allocated NPC slots.
    #[must_use]
    pub fn npc_capacity(mut self, capacity: usize) -> Self {
        self.npc_capacity = Some(capacity);
        self
    }

    /// Spell catalog.
    #[must_use]
    pub fn spells(mut self, spells: SpellBook) -> Self {
        self.spells = spells;
        self
    }

    /// Tunables.
    #[must_use]
    pub fn config(mut self, config: SpellConfig) -> Self {
        self.config = config;
        self
    }

    /// Random source. Defaults to [`Dice`] seeded from the config.
    #[must_use]
    pub fn rng(mut self, rng: impl RandomSource + 'static) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    /// Outbound notifier. Defaults to dropping events.
    #[must_use]
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    /// Spatial index. Defaults to [`RegistryScan`].
    #[must_use]
    pub fn spatial(mut self, spatial: impl SpatialIndex + 'static) -> Self {
        self.spatial = Some(Box::new(spatial));
        self
    }

    /// Hostility rule. Defaults to [`RealmHostility`].
    #[must_use]
    pub fn hostility(mut self, hostility: impl Hostility + 'static) -> Self {
        self.hostility = Some(Box::new(hostility));
        self
    }

    /// Line of sight. Defaults to [`OpenField`].
    #[must_use]
    pub fn sight(mut self, sight: impl LineOfSight + 'static) -> Self {
        self.sight = Some(Box::new(sight));
        self
    }

    /// Builds the world.
    #[must_use]
    pub fn build(self) -> World {
        let rng = self
            .rng
            .unwrap_or_else(|| Box::new(Dice::new(self.config.rng_seed, self.config.override_deck_rng)));
        tracing::info!("world built: {} spells, deck override {}", self.spells.len(), self.config.override_deck_rng);
        World {
            registry: EntityRegistry::new(self.npc_capacity.unwrap_or(1024)),
            groups: Groups::new(),
            spells: self.spells,
            config: self.config,
            rng,
            notifier: self.notifier.unwrap_or_else(|| Box::new(NullNotifier)),
            spatial: self.spatial.unwrap_or_else(|| Box::new(RegistryScan)),
            hostility: self.hostility.unwrap_or_else(|| Box::new(RealmHostility)),
            sight: self.sight.unwrap_or_else(|| Box::new(OpenField)),
            casts: CastSlots::default(),
            attacks: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn test_builder_defaults_and_spawn() {
        let (sender, receiver) = EventBus::create_pair(16);
        let world = World::builder().npc_capacity(8).notifier(sender).build();
        let player = world.spawn_player("p", LivingState::default());
        let npc = world.spawn_npc("n", LivingState::default());
        assert_eq!(npc.npc_slot(), Some(0));
        assert!(world.registry().get(player.id()).is_some());

        world.message(player.id(), "hello");
        assert_eq!(receiver.drain(), vec![SpellEvent::Message { to: player.id(), text: "hello".into() }]);

        world.despawn(&npc);
        assert!(world.registry().get(npc.id()).is_none());
        assert_eq!(world.registry().last_non_null_npc_index(), -1);
    }

    #[test]
    fn test_attack_buffer_drains_in_order() {
        let world = World::builder().build();
        world.raise_attacked(EntityId(1), EntityId(2));
        world.raise_attacked(EntityId(3), EntityId(4));
        let attacks = world.take_attacks();
        assert_eq!(attacks.len(), 2);
        assert_eq!(attacks[0], AttackNotice { defender: EntityId(1), attacker: EntityId(2) });
        assert!(world.take_attacks().is_empty());
    }
}
