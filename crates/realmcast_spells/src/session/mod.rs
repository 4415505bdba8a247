//! # Cast Sessions
//!
//! One [`CastSession`] per cast, advanced once per tick.
//!
//! ## State Machine
//!
//! ```text
//!             begin checks ok
//!   Precast ──────────────────> Casting ──elapsed + end checks──> Finished
//!      │ instant + end checks ok    │                                 │
//!      ├──────────────────────────────────────────────────────────────┤
//!      │                            │ during/end checks fail,         v
//!      │ checks fail, locked out    │ attacked, moved        resolution
//!      ├─────────────> Interrupted <┘                                 │
//!      │                    │                          focus spell ───┴─> Focusing
//!      │                    │                                  moved, died, │
//!      │ checks fail        v                                  effect gone  │
//!      └──────────────> Cleanup <───────────────────────────────────────────┘
//! ```
//!
//! Finished, Interrupted and Cleanup fall through within the tick that
//! reaches them: an instant spell goes Precast, Finished, Cleanup in one call
//! to [`CastSession::tick`].
//!
//! Sessions live in [`CastSlots`], one channeled and one instant slot per
//! caster, so an instant reaction never stomps a channeled cast.

pub(crate) mod checks;
pub mod resolution;
mod slots;

use std::sync::Arc;

use realmcast_core::{CooldownKey, EntityId, Living, SpellDefinition, TargetMode};
use realmcast_shared::{Tick, CAST_ENDURANCE_COST};

pub use checks::CastRejection;
pub use resolution::{start_spell, TargetOutcome, TargetResult};
pub use slots::{Admission, CastReport, CastSlots};

use crate::events::SpellEvent;
use crate::world::World;

/// Where a cast is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CastState {
    /// Created, nothing validated yet.
    Precast = 0,
    /// Channeling.
    Casting = 1,
    /// Aborted after validation.
    Interrupted = 2,
    /// Focus spell held up after resolution.
    Focusing = 3,
    /// Validated, resolution pending.
    Finished = 4,
    /// Terminal.
    Cleanup = 5,
}

impl CastState {
    /// States a session passes through without waiting for the next tick.
    #[inline]
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Interrupted | Self::Finished)
    }
}

/// Registry component carried by every entity with a cast in [`CastState::Casting`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Casting;

/// The three stages of the cast bar.
///
/// The first and last stages are a third of the cast each, capped by the
/// configured maximum stage length; the middle stage takes the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CastStages {
    /// Opening stage.
    pub step1: Tick,
    /// Middle stage.
    pub step2: Tick,
    /// Closing stage.
    pub step3: Tick,
}

impl CastStages {
    /// Splits `cast_time` into stages.
    #[must_use]
    pub fn new(cast_time: Tick, max_stage: Tick) -> Self {
        let outer = (cast_time / 3).min(max_stage).max(1);
        let step2 = cast_time.saturating_sub(2 * outer).max(1);
        Self { step1: outer, step2, step3: outer }
    }

    /// Sum of the stages.
    #[inline]
    #[must_use]
    pub const fn total(&self) -> Tick {
        self.step1 + self.step2 + self.step3
    }
}

/// A single cast.
#[derive(Debug)]
pub struct CastSession {
    caster: Arc<Living>,
    spell: Arc<SpellDefinition>,
    selected: Option<EntityId>,
    target: Option<Arc<Living>>,
    state: CastState,
    started_at: Tick,
    cast_time: Tick,
    interrupted: bool,
    start_reuse_timer: bool,
    trail: Vec<CastState>,
    outcomes: Vec<TargetOutcome>,
}

impl CastSession {
    /// A new session in [`CastState::Precast`]. `selected` overrides the
    /// caster's current target.
    #[must_use]
    pub fn new(caster: Arc<Living>, spell: Arc<SpellDefinition>, selected: Option<EntityId>) -> Self {
        Self {
            caster,
            spell,
            selected,
            target: None,
            state: CastState::Precast,
            started_at: 0,
            cast_time: 0,
            interrupted: false,
            start_reuse_timer: true,
            trail: vec![CastState::Precast],
            outcomes: Vec::new(),
        }
    }

    /// Caster.
    #[inline]
    #[must_use]
    pub fn caster(&self) -> &Arc<Living> {
        &self.caster
    }

    /// Spell being cast.
    #[inline]
    #[must_use]
    pub fn spell(&self) -> &Arc<SpellDefinition> {
        &self.spell
    }

    /// Target resolved in Precast.
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&Arc<Living>> {
        self.target.as_ref()
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> CastState {
        self.state
    }

    /// Tick the cast started.
    #[inline]
    #[must_use]
    pub fn started_at(&self) -> Tick {
        self.started_at
    }

    /// Computed cast duration.
    #[inline]
    #[must_use]
    pub fn cast_time(&self) -> Tick {
        self.cast_time
    }

    /// Whether the cast was interrupted.
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Whether finishing arms the recast timer.
    #[inline]
    #[must_use]
    pub fn starts_reuse_timer(&self) -> bool {
        self.start_reuse_timer
    }

    /// Every state entered so far, oldest first.
    #[must_use]
    pub fn trail(&self) -> &[CastState] {
        &self.trail
    }

    /// What resolution did, once Finished has run.
    #[must_use]
    pub fn outcomes(&self) -> &[TargetOutcome] {
        &self.outcomes
    }

    /// Cast bar stages of this cast.
    #[must_use]
    pub fn stages(&self, max_stage: Tick) -> CastStages {
        CastStages::new(self.cast_time, max_stage)
    }

    fn enter(&mut self, state: CastState) {
        if self.state != state {
            tracing::debug!("{} {}: {:?} -> {:?}", self.caster.id(), self.spell.id, self.state, state);
            self.state = state;
            self.trail.push(state);
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advances the session by one tick and returns the state it settled in.
    pub fn tick(&mut self, world: &World, now: Tick) -> CastState {
        loop {
            match self.state {
                CastState::Precast => self.precast(world, now),
                CastState::Casting => self.casting(world, now),
                CastState::Interrupted => self.enter(CastState::Cleanup),
                CastState::Finished => self.finish(world, now),
                CastState::Focusing => self.focusing(world),
                CastState::Cleanup => {}
            }
            if !self.state.is_transient() {
                return self.state;
            }
        }
    }

    fn resolve_target(&self, world: &World) -> Option<Arc<Living>> {
        if self.spell.target == TargetMode::SelfOnly {
            return Some(Arc::clone(&self.caster));
        }
        let registry = world.registry();
        let (current, suggested, pet) = {
            let state = self.caster.state();
            (state.target, state.suggested_target, state.pet)
        };
        let mut target = self.selected.or(current).and_then(|id| registry.get(id));
        if target.is_none() && self.caster.is_npc() {
            target = suggested.and_then(|id| registry.get(id));
        }
        if self.spell.target == TargetMode::Pet && self.caster.is_player() {
            let own = target.as_ref().is_some_and(|t| t.is_npc() && t.owner() == Some(self.caster.id()));
            if !own {
                target = pet.and_then(|id| registry.get(id)).or(target);
            }
        }
        target
    }

    /// Resolves the target and runs the begin checks ahead of admission.
    /// A refused cast is reported to the caster.
    pub(crate) fn admit(&mut self, world: &World, now: Tick) -> Result<(), CastRejection> {
        self.target = self.resolve_target(world);
        checks::begin(world, &self.caster, &self.spell, self.target.as_ref(), now).map_err(|rejection| {
            self.reject(world, &rejection);
            rejection
        })
    }

    /// Reports `rejection` to the caster and hands it back.
    pub(crate) fn refuse(&self, world: &World, rejection: CastRejection) -> CastRejection {
        self.reject(world, &rejection);
        rejection
    }

    fn precast(&mut self, world: &World, now: Tick) {
        self.target = self.resolve_target(world);
        if let Err(rejection) = checks::begin(world, &self.caster, &self.spell, self.target.as_ref(), now) {
            self.reject(world, &rejection);
            let locked = self.caster.state().is_interrupt_locked(now);
            self.enter(if locked { CastState::Interrupted } else { CastState::Cleanup });
            return;
        }

        self.started_at = now;
        self.cast_time = self.spell.cast_time;
        if self.spell.is_instant() {
            match checks::end(world, &self.caster, &self.spell, self.target.as_ref(), now) {
                Ok(()) => self.enter(CastState::Finished),
                Err(rejection) => {
                    self.reject(world, &rejection);
                    self.enter(CastState::Interrupted);
                }
            }
            return;
        }

        self.announce(world);
        self.enter(CastState::Casting);
    }

    fn casting(&mut self, world: &World, now: Tick) {
        let target = self.target.as_ref();
        if let Err(rejection) = checks::during(world, &self.caster, &self.spell, target, now) {
            self.reject(world, &rejection);
            self.interrupt(world);
            return;
        }
        if now < self.started_at + self.cast_time {
            return;
        }

        match checks::end(world, &self.caster, &self.spell, target, now) {
            Ok(()) => self.enter(CastState::Finished),
            // A pulsing mez waits in Casting until the end checks pass.
            Err(_) if self.spell.is_pulsing() && self.spell.is_mesmerize() => {}
            Err(rejection) => {
                self.reject(world, &rejection);
                self.interrupt(world);
            }
        }
    }

    /// A focus ends when its caster dies, moves or its effects are gone.
    fn focusing(&mut self, world: &World) {
        if !self.caster.is_alive() || !world.scheduler().holds_focus(&self.caster, &self.spell) {
            self.drop_focus(world);
            return;
        }
        let moving = {
            let state = self.caster.state();
            state.moving || state.strafing
        };
        if moving {
            self.caster_moves(world);
        }
    }

    fn announce(&self, world: &World) {
        if self.caster.is_player() {
            let text = if self.spell.instrument_required {
                format!("You begin playing {}!", self.spell.name)
            } else {
                format!("You begin casting a {} spell!", self.spell.name)
            };
            world.message(self.caster.id(), text);
        }
        world.notify(SpellEvent::CastStarted {
            caster: self.caster.id(),
            spell: self.spell.id,
            target: self.target.as_ref().map(|t| t.id()),
            cast_time: self.cast_time,
        });
    }

    fn reject(&self, world: &World, rejection: &CastRejection) {
        tracing::debug!("{} {} rejected: {:?}", self.caster.id(), self.spell.id, rejection);
        if rejection.is_silent() {
            return;
        }
        let reason = rejection.to_string();
        world.message(self.caster.id(), reason.clone());
        world.notify(SpellEvent::CastRejected { caster: self.caster.id(), spell: self.spell.id, reason });
    }

    // =========================================================================
    // Interrupts
    // =========================================================================

    /// Interrupts a cast in [`CastState::Casting`] and runs it to Cleanup.
    ///
    /// Returns `false` (and does nothing) if the cast is not channeling or
    /// was already interrupted.
    pub fn interrupt(&mut self, world: &World) -> bool {
        if self.interrupted || self.state != CastState::Casting {
            return false;
        }
        self.interrupted = true;
        self.start_reuse_timer = false;
        self.enter(CastState::Interrupted);
        world.notify(SpellEvent::CastInterrupted { caster: self.caster.id(), spell: self.spell.id });
        self.enter(CastState::Cleanup);
        true
    }

    /// The caster moved. Songs and move-cast spells ignore it; a focus is
    /// dropped; a channeled cast is interrupted.
    pub fn caster_moves(&mut self, world: &World) -> bool {
        if self.spell.instrument_required || self.spell.move_cast {
            return false;
        }
        match self.state {
            CastState::Focusing => {
                self.drop_focus(world);
                true
            }
            CastState::Casting => {
                if self.caster.is_player() {
                    world.message(self.caster.id(), CastRejection::Moved.to_string());
                }
                self.interrupt(world)
            }
            _ => false,
        }
    }

    /// Ends a held focus. Returns `false` when not focusing.
    pub fn cancel_focus(&mut self, world: &World) -> bool {
        if self.state != CastState::Focusing {
            return false;
        }
        self.drop_focus(world);
        true
    }

    fn drop_focus(&mut self, world: &World) {
        world.scheduler().cancel_focus(&self.caster, &self.spell);
        world.notify(SpellEvent::FocusLost { caster: self.caster.id(), spell: self.spell.id });
        self.enter(CastState::Cleanup);
    }

    // =========================================================================
    // Finish
    // =========================================================================

    fn finish(&mut self, world: &World, now: Tick) {
        let caster = Arc::clone(&self.caster);
        let spell = Arc::clone(&self.spell);

        let cost = world.resolver().power_cost(&world.combatant(&caster), &spell);
        if cost > 0 {
            let mut state = caster.state_mut();
            state.mana = (state.mana - cost).max(0);
        }
        if caster.is_player() {
            world.message(caster.id(), format!("You cast a {} spell!", spell.name));
        }

        let scheduler = world.scheduler();
        if spell.is_pulsing() {
            scheduler.cancel_pulses(&caster, None);
            if !spell.is_mesmerize() {
                let anchor = self.target.as_deref().unwrap_or(&caster);
                scheduler.start_pulse(&caster, &spell, anchor, now);
            }
        }

        self.outcomes = start_spell(world, &caster, &spell, self.target.as_ref(), now);

        {
            let mut state = caster.state_mut();
            if self.start_reuse_timer && spell.recast_delay > 0 {
                let until = now + spell.recast_delay;
                state.cooldowns.insert(CooldownKey::Spell(spell.id), until);
                if spell.shared_timer_group != 0 {
                    state.cooldowns.insert(CooldownKey::Group(spell.shared_timer_group), until);
                }
            }
            if caster.is_player() && !spell.is_pulsing() {
                state.endurance = (state.endurance - CAST_ENDURANCE_COST).max(0);
            }
            if !spell.is_instant() {
                state.quick_cast = false;
            }
        }

        world.notify(SpellEvent::CastFinished { caster: caster.id(), spell: spell.id });
        self.enter(if spell.focus { CastState::Focusing } else { CastState::Cleanup });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::rng::ScriptedRandom;
    use realmcast_core::{LivingState, Realm, SpellId, SpellKind};
    use realmcast_shared::Vec3;

    fn caster_state() -> LivingState {
        LivingState { realm: Realm(1), level: 50, mana: 500, max_mana: 500, ..LivingState::default() }
    }

    fn foe_state() -> LivingState {
        LivingState {
            position: Vec3::new(200.0, 0.0, 0.0),
            realm: Realm(2),
            level: 50,
            health: 1_000,
            max_health: 1_000,
            ..LivingState::default()
        }
    }

    fn bolt(cast_time: Tick) -> Arc<SpellDefinition> {
        Arc::new(SpellDefinition {
            id: SpellId(7),
            name: "Bolt".into(),
            damage: 50.0,
            power: 10,
            cast_time,
            recast_delay: 2_000,
            shared_timer_group: 3,
            ..SpellDefinition::default()
        })
    }

    #[test]
    fn test_cast_stages() {
        assert_eq!(CastStages::new(3_000, 1_500), CastStages { step1: 1_000, step2: 1_000, step3: 1_000 });
        assert_eq!(CastStages::new(6_000, 1_500), CastStages { step1: 1_500, step2: 3_000, step3: 1_500 });
        assert_eq!(CastStages::new(0, 1_500), CastStages { step1: 1, step2: 1, step3: 1 });
        assert_eq!(CastStages::new(2, 1_500).total(), 3);
    }

    #[test]
    fn test_instant_runs_to_cleanup_in_one_tick() {
        let world = World::builder().rng(ScriptedRandom::constant(99)).build();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_player("f", foe_state());
        let mut session = CastSession::new(Arc::clone(&caster), bolt(0), Some(foe.id()));

        assert_eq!(session.tick(&world, 100), CastState::Cleanup);
        assert_eq!(session.trail(), &[CastState::Precast, CastState::Finished, CastState::Cleanup]);
        assert_eq!(session.outcomes().len(), 1);
        assert!(foe.state().health < 1_000);

        let state = caster.state();
        assert_eq!(state.mana, 500 - 12);
        assert_eq!(state.endurance, 100 - CAST_ENDURANCE_COST);
        assert_eq!(state.cooldowns.get(&CooldownKey::Spell(SpellId(7))), Some(&2_100));
        assert_eq!(state.cooldowns.get(&CooldownKey::Group(3)), Some(&2_100));
    }

    #[test]
    fn test_channeled_waits_for_cast_time() {
        let (sender, receiver) = EventBus::create_pair(64);
        let world = World::builder().notifier(sender).rng(ScriptedRandom::constant(99)).build();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_player("f", foe_state());
        let mut session = CastSession::new(caster, bolt(3_000), Some(foe.id()));

        assert_eq!(session.tick(&world, 0), CastState::Casting);
        assert!(receiver.drain().iter().any(|e| matches!(e, SpellEvent::CastStarted { cast_time: 3_000, .. })));
        assert_eq!(session.tick(&world, 2_999), CastState::Casting);
        assert_eq!(foe.state().health, 1_000);
        assert_eq!(session.tick(&world, 3_000), CastState::Cleanup);
        assert!(foe.state().health < 1_000);
    }

    #[test]
    fn test_failed_begin_goes_to_cleanup_or_interrupted() {
        let world = World::builder().build();
        let caster = world.spawn_player("c", LivingState { silenced: true, ..caster_state() });
        let foe = world.spawn_player("f", foe_state());
        let mut session = CastSession::new(Arc::clone(&caster), bolt(3_000), Some(foe.id()));
        session.tick(&world, 0);
        assert_eq!(session.trail(), &[CastState::Precast, CastState::Cleanup]);

        {
            let mut state = caster.state_mut();
            state.silenced = false;
            state.interrupt_action = 5;
            state.interrupt_until = 4_500;
        }
        let mut locked = CastSession::new(caster, bolt(3_000), Some(foe.id()));
        locked.tick(&world, 10);
        assert_eq!(locked.trail(), &[CastState::Precast, CastState::Interrupted, CastState::Cleanup]);
    }

    #[test]
    fn test_interrupt_only_while_casting() {
        let world = World::builder().build();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_player("f", foe_state());
        let mut session = CastSession::new(caster, bolt(3_000), Some(foe.id()));
        assert!(!session.interrupt(&world));

        session.tick(&world, 0);
        assert!(session.interrupt(&world));
        assert!(session.is_interrupted());
        assert!(!session.starts_reuse_timer());
        assert_eq!(session.state(), CastState::Cleanup);
        assert!(!session.interrupt(&world));
    }

    #[test]
    fn test_moving_interrupts_unless_song() {
        let world = World::builder().build();
        let caster = world.spawn_player("c", LivingState { has_instrument: true, ..caster_state() });
        let foe = world.spawn_player("f", foe_state());

        let mut cast = CastSession::new(Arc::clone(&caster), bolt(3_000), Some(foe.id()));
        cast.tick(&world, 0);
        assert!(cast.caster_moves(&world));
        assert_eq!(cast.state(), CastState::Cleanup);

        let song = Arc::new(SpellDefinition { instrument_required: true, ..(*bolt(3_000)).clone() });
        let mut playing = CastSession::new(caster, song, Some(foe.id()));
        playing.tick(&world, 0);
        assert!(!playing.caster_moves(&world));
        assert_eq!(playing.state(), CastState::Casting);
    }

    #[test]
    fn test_focus_held_until_moved() {
        let world = World::builder().rng(ScriptedRandom::constant(99)).build();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_player("f", foe_state());
        let focus = Arc::new(SpellDefinition {
            kind: SpellKind::Debuff,
            focus: true,
            duration: 60_000,
            ..(*bolt(0)).clone()
        });
        let mut session = CastSession::new(caster, focus, Some(foe.id()));
        assert_eq!(session.tick(&world, 0), CastState::Focusing);
        assert_eq!(foe.effects_snapshot().len(), 1);
        assert_eq!(session.tick(&world, 500), CastState::Focusing);

        assert!(session.caster_moves(&world));
        assert_eq!(session.state(), CastState::Cleanup);
        assert!(foe.effects_snapshot().is_empty());
    }

    #[test]
    fn test_focus_ends_with_caster_or_effect() {
        let world = World::builder().rng(ScriptedRandom::constant(99)).build();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_player("f", foe_state());
        let focus = Arc::new(SpellDefinition {
            kind: SpellKind::Debuff,
            focus: true,
            duration: 60_000,
            ..(*bolt(0)).clone()
        });

        let mut session = CastSession::new(Arc::clone(&caster), Arc::clone(&focus), Some(foe.id()));
        assert_eq!(session.tick(&world, 0), CastState::Focusing);
        caster.state_mut().alive = false;
        assert_eq!(session.tick(&world, 500), CastState::Cleanup);
        assert!(foe.effects_snapshot().is_empty());

        caster.state_mut().alive = true;
        let mut session = CastSession::new(caster, focus, Some(foe.id()));
        assert_eq!(session.tick(&world, 10_000), CastState::Focusing);
        let held = foe.effects_snapshot();
        world.scheduler().cancel(&held[0], crate::events::CancelReason::Explicit);
        assert_eq!(session.tick(&world, 10_500), CastState::Cleanup);
    }

    #[test]
    fn test_self_spell_ignores_selection() {
        let world = World::builder().build();
        let caster = world.spawn_player("c", LivingState { health: 10, max_health: 100, ..caster_state() });
        let foe = world.spawn_player("f", foe_state());
        let heal = Arc::new(SpellDefinition {
            kind: SpellKind::Heal,
            target: TargetMode::SelfOnly,
            value: 40.0,
            ..SpellDefinition::default()
        });
        let mut session = CastSession::new(Arc::clone(&caster), heal, Some(foe.id()));
        session.tick(&world, 0);
        assert_eq!(session.target().map(|t| t.id()), Some(caster.id()));
        assert!(caster.state().health > 10);
    }
}
