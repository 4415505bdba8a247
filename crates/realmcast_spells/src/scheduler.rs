//! # Effect Scheduler
//!
//! Creates, re-evaluates and removes the effects spells leave behind.
//!
//! ## Effect Lifecycle
//!
//! ```text
//!   apply() ──┬─ instant ──> damage / heal / resurrect, nothing retained
//!             └─ duration ─> ActiveEffect ──tick()──> periodic damage, pulses
//!                                 │
//!       Explicit / Expired / Overwritten / ResourceExhausted /
//!       InstrumentLost / CasterDied / CasterMoved
//!                                 │
//!                                 v
//!                             cancel()  ── one removal path
//! ```
//!
//! Every cancellation funnels through [`EffectScheduler::cancel`], which runs
//! its body exactly once per effect no matter how many paths race to it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use realmcast_core::{ActiveEffect, EffectId, EffectSnapshot, Living, Realm, SpellDefinition, SpellKind, SpellLine};
use realmcast_shared::Tick;

use crate::error::{panic_message, SpellError};
use crate::events::{CancelReason, SpellEvent};
use crate::resolver::{is_new_effect_better, is_overwritable, DamageOutcome};
use crate::session::resolution;
use crate::world::World;

/// Why [`EffectScheduler::apply`] refused a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyRejection {
    /// Effectiveness was zero or negative.
    Ineffective,
    /// The target does not accept this category of spell.
    Immune,
    /// Duration effects need a living target.
    TargetDead,
    /// A better effect of the same group is already active.
    BetterEffectActive,
    /// The caster maintains the maximum number of concentration effects.
    ConcentrationFull,
}

/// What applying a spell to one target did.
#[derive(Clone, Debug)]
pub enum ApplyOutcome {
    /// A duration or concentration effect was created.
    Effect(Arc<ActiveEffect>),
    /// Instant damage was dealt.
    Damage(DamageOutcome),
    /// Instant healing.
    Healed(i32),
    /// The target was brought back to life.
    Resurrected,
    /// An instant spell with nothing to do on landing.
    NoEffect,
    /// Refused.
    Rejected(ApplyRejection),
}

/// What one [`EffectScheduler::tick`] did.
#[derive(Clone, Debug, Default)]
pub struct EffectSweep {
    /// Effects looked at.
    pub processed: usize,
    /// Effects that faulted and were removed.
    pub faults: Vec<SpellError>,
}

/// Effect operations bound to a [`World`].
#[derive(Clone, Copy)]
pub struct EffectScheduler<'w> {
    world: &'w World,
}

impl<'w> EffectScheduler<'w> {
    /// Binds the scheduler to `world`.
    #[must_use]
    pub fn new(world: &'w World) -> Self {
        Self { world }
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Applies a landed spell to `target`.
    pub fn apply(
        &self,
        caster: &Arc<Living>,
        target: &Arc<Living>,
        spell: &Arc<SpellDefinition>,
        effectiveness: f64,
        now: Tick,
    ) -> ApplyOutcome {
        if effectiveness <= 0.0 {
            return ApplyOutcome::Rejected(ApplyRejection::Ineffective);
        }
        if target.structure().is_some() {
            let accepted = spell.kind.is_direct_damage() && (spell.radius <= 0.0 || spell.is_point_blank_area());
            if !accepted {
                return ApplyOutcome::Rejected(ApplyRejection::Immune);
            }
        }

        let effectiveness = match spell.line {
            SpellLine::CombatStyles => 1.0,
            SpellLine::ItemEffects | SpellLine::Potions => effectiveness.max(1.0),
            _ => effectiveness,
        };

        if spell.duration > 0 || spell.is_concentration() {
            self.apply_duration(caster, target, spell, effectiveness, now)
        } else {
            self.apply_instant(caster, target, spell, effectiveness, now)
        }
    }

    fn apply_instant(
        &self,
        caster: &Arc<Living>,
        target: &Arc<Living>,
        spell: &Arc<SpellDefinition>,
        effectiveness: f64,
        now: Tick,
    ) -> ApplyOutcome {
        let resolver = self.world.resolver();
        match spell.kind {
            SpellKind::DirectDamage | SpellKind::Lifedrain { .. } => {
                let attacker = self.world.combatant(caster);
                let defender = self.world.combatant(target);
                let outcome = resolver.resolve_damage(&attacker, &defender, spell, effectiveness);
                self.deal_damage(caster, target, spell, outcome, now);
                if let SpellKind::Lifedrain { return_permille } = spell.kind {
                    let drained = outcome.total() * return_permille / 1000;
                    if drained > 0 && caster.is_alive() {
                        caster.state_mut().apply_health_delta(-drained);
                        self.world.notify(SpellEvent::Healed {
                            caster: caster.id(),
                            target: caster.id(),
                            spell: spell.id,
                            amount: drained,
                        });
                    }
                }
                ApplyOutcome::Damage(outcome)
            }
            SpellKind::Heal => {
                if !target.is_alive() {
                    return ApplyOutcome::Rejected(ApplyRejection::TargetDead);
                }
                let amount = resolver.heal_amount(&self.world.combatant(caster), spell, effectiveness);
                target.state_mut().apply_health_delta(-amount);
                self.world.notify(SpellEvent::Healed { caster: caster.id(), target: target.id(), spell: spell.id, amount });
                ApplyOutcome::Healed(amount)
            }
            SpellKind::Resurrect => {
                if target.is_alive() {
                    return ApplyOutcome::NoEffect;
                }
                {
                    let mut state = target.state_mut();
                    let percent = if spell.value > 0.0 { spell.value.min(100.0) } else { 10.0 };
                    state.alive = true;
                    state.health = ((f64::from(state.max_health) * percent / 100.0) as i32).max(1);
                }
                self.world.message(target.id(), format!("{} brings you back to life.", caster.name()));
                ApplyOutcome::Resurrected
            }
            _ => ApplyOutcome::NoEffect,
        }
    }

    fn apply_duration(
        &self,
        caster: &Arc<Living>,
        target: &Arc<Living>,
        spell: &Arc<SpellDefinition>,
        effectiveness: f64,
        now: Tick,
    ) -> ApplyOutcome {
        if !target.is_alive() {
            return ApplyOutcome::Rejected(ApplyRejection::TargetDead);
        }
        let duration = self.world.resolver().effect_duration(&self.world.combatant(caster), spell, effectiveness);

        let mut replaced = Vec::new();
        for existing in target.effects_snapshot() {
            if existing.is_cancelled() || !is_overwritable(spell, existing.spell()) {
                continue;
            }
            if is_new_effect_better(&existing, spell, duration, now) {
                replaced.push(existing);
            } else {
                self.world.message(caster.id(), format!("{} already has that effect.", target.name()));
                return ApplyOutcome::Rejected(ApplyRejection::BetterEffectActive);
            }
        }

        if spell.is_concentration() {
            let max = self.world.config().max_concentration_effects;
            if caster.concentration().len() >= max {
                return ApplyOutcome::Rejected(ApplyRejection::ConcentrationFull);
            }
        }

        for old in &replaced {
            self.cancel(old, CancelReason::Overwritten);
        }

        let effect = Arc::new(ActiveEffect::new(Arc::clone(spell), caster.id(), target.id(), effectiveness, now, duration));
        if spell.is_concentration() {
            caster.concentration().push(Arc::clone(&effect));
            caster.state_mut().concentration -= spell.concentration;
        }
        self.track(target, &effect);

        if spell.kind.is_harmful() {
            self.record_attack(caster, target, now);
        }
        ApplyOutcome::Effect(effect)
    }

    /// Registers `effect` on `target` and starts it.
    fn track(&self, target: &Living, effect: &Arc<ActiveEffect>) {
        target.effects().push(Arc::clone(effect));
        self.world.registry().add_effect(Arc::clone(effect));
        start_effect(target, effect.spell(), true);
        let duration = effect.timing().expires_at.map_or(0, |at| at - effect.started_at());
        tracing::debug!("{} applied to {} for {} ticks", effect.spell().id, target.id(), duration);
        self.world.notify(SpellEvent::EffectApplied {
            effect: effect.id(),
            spell: effect.spell().id,
            owner: target.id(),
            duration,
        });
    }

    /// Starts the pulse driver of a pulsing spell on `caster`.
    pub fn start_pulse(&self, caster: &Arc<Living>, spell: &Arc<SpellDefinition>, target: &Living, now: Tick) -> Arc<ActiveEffect> {
        let effect = Arc::new(ActiveEffect::pulse(Arc::clone(spell), caster.id(), target.id(), now));
        caster.concentration().push(Arc::clone(&effect));
        self.world.registry().add_effect(Arc::clone(&effect));
        tracing::debug!("{} starts pulsing {} every {} ticks", caster.id(), spell.id, spell.frequency);
        effect
    }

    // =========================================================================
    // Hits, resists, aggro
    // =========================================================================

    fn deal_damage(&self, caster: &Living, target: &Living, spell: &SpellDefinition, outcome: DamageOutcome, now: Tick) {
        let killed = {
            let mut state = target.state_mut();
            if state.damage_immune {
                false
            } else {
                state.apply_health_delta(outcome.total())
            }
        };
        self.world.notify(SpellEvent::Damage {
            caster: caster.id(),
            target: target.id(),
            spell: spell.id,
            damage_type: outcome.damage_type,
            amount: outcome.damage,
            critical: outcome.critical,
            resist_modifier: outcome.resist_modifier,
        });
        self.record_attack(caster, target, now);
        if killed {
            tracing::debug!("{} killed {} with {}", caster.id(), target.id(), spell.id);
            self.world.notify(SpellEvent::Killed { caster: caster.id(), target: target.id() });
            self.release_all(target);
        }
    }

    /// Aggro, last-attacked ticks and the attacked-hook for a harmful landing.
    fn record_attack(&self, caster: &Living, target: &Living, now: Tick) {
        let caster_realm = caster.realm();
        let target_realm = target.realm();
        let pve = caster_realm == Realm::NONE || target_realm == Realm::NONE;
        {
            let mut state = target.state_mut();
            if pve {
                state.last_attacked_pve = now;
            } else {
                state.last_attacked_pvp = now;
            }
        }
        if target.is_npc() {
            self.world.notify(SpellEvent::Aggro { npc: target.id(), attacker: caster.id(), amount: 1 });
        }
        if caster.id() != target.id() {
            self.world.raise_attacked(target.id(), caster.id());
        }
    }

    /// Side effects of a resisted spell.
    pub fn resisted(&self, caster: &Living, target: &Living, spell: &SpellDefinition, now: Tick) {
        self.world.notify(SpellEvent::Resisted { caster: caster.id(), target: target.id(), spell: spell.id });
        match target.owner().and_then(|id| self.world.registry().get(id)).filter(|o| o.is_player()) {
            Some(owner) if target.is_npc() => {
                self.world.message(owner.id(), format!("Your {} resists the effect!", target.name()));
            }
            _ => self.world.message(target.id(), "You resist the effect!"),
        }
        self.world.message(caster.id(), format!("{} resists the effect!", target.name()));

        let harmless_debuff = spell.is_instant() && spell.kind == SpellKind::Debuff && spell.damage == 0.0;
        if !harmless_debuff {
            let mut state = target.state_mut();
            state.interrupt_action = now;
            state.interrupt_until = now + self.world.config().spell_interrupt_duration;
        }
        self.record_attack(caster, target, now);
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Expires ended effects, fires periodic damage and pulses due at `now`.
    ///
    /// An effect that panics is removed with [`CancelReason::Fault`] and
    /// reported; the rest of the sweep carries on.
    pub fn tick(&self, now: Tick) -> EffectSweep {
        let mut effects = self.world.registry().effects();
        effects.sort_unstable_by_key(|e| e.id());
        let mut sweep = EffectSweep { processed: effects.len(), faults: Vec::new() };
        for effect in &effects {
            if effect.is_cancelled() {
                continue;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.tick_effect(effect, now))) {
                let fault = SpellError::EffectFault {
                    effect: effect.id(),
                    spell: effect.spell().id,
                    reason: panic_message(payload.as_ref()),
                };
                tracing::error!("{}; effect removed", fault);
                if catch_unwind(AssertUnwindSafe(|| self.cancel(effect, CancelReason::Fault))).is_err() {
                    self.world.registry().remove_effect(effect.id());
                    tracing::error!("effect {:?} faulted again while being removed", effect.id());
                }
                sweep.faults.push(fault);
            }
        }
        sweep
    }

    fn tick_effect(&self, effect: &Arc<ActiveEffect>, now: Tick) {
        if effect.is_pulse() {
            if effect.take_due_pulse(now) {
                self.pulse(effect, now);
            }
            return;
        }

        let timing = effect.timing();
        let tick_before_expiry = match (timing.next_pulse, timing.expires_at) {
            (Some(next), Some(end)) => next <= end,
            (Some(_), None) => true,
            _ => false,
        };
        if effect.spell().kind == SpellKind::DamageOverTime && tick_before_expiry && effect.take_due_pulse(now) {
            self.periodic_damage(effect, now);
        }
        if effect.is_expired(now) {
            self.cancel(effect, CancelReason::Expired);
        }
    }

    fn periodic_damage(&self, effect: &ActiveEffect, now: Tick) {
        let registry = self.world.registry();
        let (Some(caster), Some(target)) = (registry.get(effect.caster()), registry.get(effect.owner())) else {
            return;
        };
        if !target.is_alive() {
            return;
        }
        let outcome = self.world.resolver().resolve_damage(
            &self.world.combatant(&caster),
            &self.world.combatant(&target),
            effect.spell(),
            effect.effectiveness(),
        );
        self.deal_damage(&caster, &target, effect.spell(), outcome, now);
    }

    fn pulse(&self, effect: &Arc<ActiveEffect>, now: Tick) {
        let spell = effect.spell();
        let Some(caster) = self.world.registry().get(effect.caster()).filter(|c| c.is_alive()) else {
            self.cancel(effect, CancelReason::CasterDied);
            return;
        };

        let (moving, active, incapacitated, has_instrument, mana) = {
            let state = caster.state();
            (state.moving || state.strafing, state.active, state.stunned || state.mezzed, state.has_instrument, state.mana)
        };
        if spell.focus && moving {
            self.world.notify(SpellEvent::FocusLost { caster: caster.id(), spell: spell.id });
            self.cancel(effect, CancelReason::CasterMoved);
            return;
        }
        if !active || incapacitated {
            return;
        }
        if spell.instrument_required && !has_instrument {
            self.world.message(caster.id(), "You stop playing your song.");
            self.cancel(effect, CancelReason::InstrumentLost);
            return;
        }
        if mana < spell.pulse_power {
            self.world.message(caster.id(), "You do not have enough power and your spell was canceled.");
            self.cancel(effect, CancelReason::ResourceExhausted);
            return;
        }
        caster.state_mut().mana -= spell.pulse_power;

        let target = effect.pulse_target().and_then(|id| self.world.registry().get(id));
        tracing::debug!("{} pulses {} (pulse {})", caster.id(), spell.id, effect.timing().pulses);
        resolution::start_spell(self.world, &caster, spell, target.as_ref(), now);
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Removes `effect` everywhere and notifies its owner.
    ///
    /// Returns `false` if another path already removed it.
    pub fn cancel(&self, effect: &Arc<ActiveEffect>, reason: CancelReason) -> bool {
        if !effect.mark_cancelled() {
            return false;
        }
        let registry = self.world.registry();
        registry.remove_effect(effect.id());

        if let Some(owner) = registry.get(effect.owner()) {
            owner.effects().retain(|e| e.id() != effect.id());
            if !effect.is_pulse() {
                start_effect(&owner, effect.spell(), false);
            }
        }
        if effect.is_concentration() || effect.is_pulse() {
            if let Some(caster) = registry.get(effect.caster()) {
                caster.concentration().retain(|e| e.id() != effect.id());
                if effect.is_concentration() && !effect.is_pulse() {
                    let mut state = caster.state_mut();
                    state.concentration = (state.concentration + effect.spell().concentration).min(state.max_concentration);
                }
            }
        }

        tracing::debug!("effect {:?} of {} removed: {:?}", effect.id(), effect.spell().id, reason);
        self.world.notify(SpellEvent::EffectRemoved {
            effect: effect.id(),
            spell: effect.spell().id,
            owner: effect.owner(),
            reason,
        });
        true
    }

    /// Cancels an effect by id. Unknown ids are ignored.
    pub fn cancel_by_id(&self, id: EffectId, reason: CancelReason) -> bool {
        self.world
            .registry()
            .effects()
            .into_iter()
            .find(|e| e.id() == id)
            .is_some_and(|effect| self.cancel(&effect, reason))
    }

    /// Cancels every pulse `caster` maintains except those of `keep`.
    pub fn cancel_pulses(&self, caster: &Living, keep: Option<&SpellDefinition>) {
        let pulses: Vec<_> = caster
            .concentration()
            .iter()
            .filter(|e| e.is_pulse() && keep.map_or(true, |k| e.spell().id != k.id))
            .cloned()
            .collect();
        for pulse in &pulses {
            self.cancel(pulse, CancelReason::Explicit);
        }
    }

    /// The running pulse of `spell` that `caster` maintains, if any.
    #[must_use]
    pub fn find_pulse(&self, caster: &Living, spell: &SpellDefinition) -> Option<Arc<ActiveEffect>> {
        caster.concentration().iter().find(|e| e.is_pulse() && e.spell().id == spell.id).cloned()
    }

    /// Drops every effect `caster` holds up with the focus spell `spell`.
    pub fn cancel_focus(&self, caster: &Living, spell: &SpellDefinition) -> usize {
        let mut focused: Vec<_> = self
            .world
            .registry()
            .effects()
            .into_iter()
            .filter(|e| e.caster() == caster.id() && e.spell().id == spell.id)
            .collect();
        focused.sort_unstable_by_key(|e| e.id());
        focused.iter().filter(|e| self.cancel(e, CancelReason::CasterMoved)).count()
    }

    /// Whether any effect of the focus spell `spell` by `caster` is still up.
    #[must_use]
    pub fn holds_focus(&self, caster: &Living, spell: &SpellDefinition) -> bool {
        self.world
            .registry()
            .effects()
            .iter()
            .any(|e| e.caster() == caster.id() && e.spell().id == spell.id && !e.is_cancelled())
    }

    /// Cancels every effect on `living`, every effect it maintains and every
    /// focus it holds up on others.
    pub fn release_all(&self, living: &Living) {
        let carried = living.effects_snapshot();
        for effect in &carried {
            self.cancel(effect, CancelReason::Explicit);
        }
        let maintained = living.concentration().clone();
        for effect in &maintained {
            self.cancel(effect, CancelReason::CasterDied);
        }
        let mut focused: Vec<_> = self
            .world
            .registry()
            .effects()
            .into_iter()
            .filter(|e| e.caster() == living.id() && e.spell().focus)
            .collect();
        focused.sort_unstable_by_key(|e| e.id());
        for effect in &focused {
            self.cancel(effect, CancelReason::CasterDied);
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Serializable snapshot of `effect`.
    #[must_use]
    pub fn save(&self, effect: &ActiveEffect, now: Tick) -> EffectSnapshot {
        effect.snapshot(now)
    }

    /// Re-creates a saved effect with its remaining duration.
    ///
    /// Returns `None` if the spell or owner no longer exists, nothing was
    /// left of it, or a concentration effect would exceed its caster's cap.
    pub fn restore(&self, snapshot: &EffectSnapshot, now: Tick) -> Option<Arc<ActiveEffect>> {
        let registry = self.world.registry();
        let spell = self.world.spells().get(snapshot.spell)?;
        let owner = registry.get(snapshot.owner)?;
        if snapshot.remaining == Some(0) {
            return None;
        }

        let effect = if let Some(target) = snapshot.pulse_target {
            let effect = Arc::new(ActiveEffect::pulse(spell, snapshot.caster, target, now));
            owner.concentration().push(Arc::clone(&effect));
            registry.add_effect(Arc::clone(&effect));
            effect
        } else {
            let concentrating = if spell.is_concentration() {
                let caster = registry.get(snapshot.caster)?;
                if caster.concentration().len() >= self.world.config().max_concentration_effects {
                    tracing::debug!("{} not restored: {} is at the concentration cap", snapshot.spell, caster.id());
                    return None;
                }
                Some(caster)
            } else {
                None
            };
            let duration = snapshot.remaining.unwrap_or(0);
            let effect =
                Arc::new(ActiveEffect::new(spell, snapshot.caster, snapshot.owner, snapshot.effectiveness, now, duration));
            if let Some(caster) = concentrating {
                caster.concentration().push(Arc::clone(&effect));
                caster.state_mut().concentration -= effect.spell().concentration;
            }
            self.track(&owner, &effect);
            effect
        };
        effect.restore_vars(&snapshot.vars);
        tracing::debug!("restored {} on {}", snapshot.spell, snapshot.owner);
        Some(effect)
    }
}

/// Turns the generic state changes of an effect on or off.
fn start_effect(owner: &Living, spell: &SpellDefinition, on: bool) {
    let mut state = owner.state_mut();
    match spell.kind {
        SpellKind::Mesmerize => state.mezzed = on,
        SpellKind::Stun => state.stunned = on,
        SpellKind::PiercingMagic => {
            let value = spell.value as i32;
            state.piercing_magic += if on { value } else { -value };
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, Notifier};
    use crate::rng::ScriptedRandom;
    use realmcast_core::{EntityKind, LivingState, SpellId, StructureKind, TargetMode};
    use realmcast_shared::Vec3;

    fn world() -> World {
        World::builder().rng(ScriptedRandom::constant(1000).with_fraction(1.0)).build()
    }

    fn foe_state() -> LivingState {
        LivingState { position: Vec3::new(100.0, 0.0, 0.0), health: 1000, max_health: 1000, ..LivingState::default() }
    }

    fn caster_state() -> LivingState {
        LivingState { realm: Realm(1), level: 50, concentration: 50, max_concentration: 50, ..LivingState::default() }
    }

    fn buff(id: u32, value: f64, duration: Tick) -> Arc<SpellDefinition> {
        Arc::new(SpellDefinition {
            id: SpellId(id),
            kind: SpellKind::Buff,
            target: TargetMode::Realm,
            value,
            duration,
            ..SpellDefinition::default()
        })
    }

    #[test]
    fn test_rejects_zero_effectiveness_and_structures() {
        let world = world();
        let caster = world.spawn_player("c", caster_state());
        let door = world.spawn(EntityKind::Structure(StructureKind::Door), "door", foe_state());
        let bolt = Arc::new(SpellDefinition { damage: 50.0, ..SpellDefinition::default() });
        let scheduler = world.scheduler();

        assert!(matches!(
            scheduler.apply(&caster, &door, &bolt, 0.0, 0),
            ApplyOutcome::Rejected(ApplyRejection::Ineffective)
        ));
        let ranged_aoe = Arc::new(SpellDefinition { radius: 300.0, ..(*bolt).clone() });
        assert!(matches!(
            scheduler.apply(&caster, &door, &ranged_aoe, 1.0, 0),
            ApplyOutcome::Rejected(ApplyRejection::Immune)
        ));
        assert!(matches!(scheduler.apply(&caster, &door, &bolt, 1.0, 0), ApplyOutcome::Damage(_)));
    }

    #[test]
    fn test_instant_damage_and_lifedrain() {
        let world = world();
        let caster = world.spawn_player("c", LivingState { health: 50, ..caster_state() });
        let foe = world.spawn_npc("foe", foe_state());
        let drain = Arc::new(SpellDefinition {
            kind: SpellKind::Lifedrain { return_permille: 500 },
            damage: 40.0,
            ..SpellDefinition::default()
        });
        let ApplyOutcome::Damage(outcome) = world.scheduler().apply(&caster, &foe, &drain, 1.0, 10) else {
            panic!("expected damage");
        };
        assert!(outcome.damage > 0);
        assert_eq!(foe.state().health, 1000 - outcome.total());
        assert_eq!(caster.state().health, (50 + outcome.total() / 2).min(100));
        assert_eq!(foe.state().last_attacked_pvp, 0);
        assert_eq!(foe.state().last_attacked_pve, 10);
        assert_eq!(world.take_attacks().len(), 1);
    }

    #[test]
    fn test_overwrite_better_and_reject_worse() {
        let (sender, receiver) = EventBus::create_pair(64);
        let world = World::builder().notifier(sender).build();
        let caster = world.spawn_player("c", caster_state());
        let ally = world.spawn_player("a", caster_state());
        let scheduler = world.scheduler();

        let ApplyOutcome::Effect(weak) = scheduler.apply(&caster, &ally, &buff(1, 10.0, 10_000), 1.0, 0) else {
            panic!("expected effect");
        };
        let ApplyOutcome::Effect(strong) = scheduler.apply(&caster, &ally, &buff(2, 20.0, 10_000), 1.0, 5_000) else {
            panic!("expected effect");
        };
        assert!(weak.is_cancelled());
        assert_eq!(ally.effects_snapshot().len(), 1);
        assert_eq!(ally.effects_snapshot()[0].id(), strong.id());
        assert!(receiver.drain().iter().any(|e| matches!(
            e,
            SpellEvent::EffectRemoved { reason: CancelReason::Overwritten, .. }
        )));

        assert!(matches!(
            scheduler.apply(&caster, &ally, &buff(3, 5.0, 10_000), 1.0, 6_000),
            ApplyOutcome::Rejected(ApplyRejection::BetterEffectActive)
        ));

        // Different effect group: stacks.
        let other = Arc::new(SpellDefinition { effect_group: 9, ..(*buff(4, 1.0, 10_000)).clone() });
        assert!(matches!(scheduler.apply(&caster, &ally, &other, 1.0, 6_000), ApplyOutcome::Effect(_)));
        assert_eq!(ally.effects_snapshot().len(), 2);
    }

    #[test]
    fn test_concentration_cap_and_refund() {
        let config = crate::SpellConfig { max_concentration_effects: 1, ..crate::SpellConfig::default() };
        let world = World::builder().config(config).build();
        let caster = world.spawn_player("c", caster_state());
        let ally = world.spawn_player("a", caster_state());
        let conc = Arc::new(SpellDefinition { concentration: 10, effect_group: 1, ..(*buff(1, 10.0, 0)).clone() });
        let conc2 = Arc::new(SpellDefinition { id: SpellId(2), effect_group: 2, ..(*conc).clone() });
        let scheduler = world.scheduler();

        let ApplyOutcome::Effect(effect) = scheduler.apply(&caster, &ally, &conc, 1.0, 0) else {
            panic!("expected effect");
        };
        assert_eq!(effect.remaining(1_000_000), None);
        assert_eq!(caster.state().concentration, 40);
        assert!(matches!(
            scheduler.apply(&caster, &ally, &conc2, 1.0, 0),
            ApplyOutcome::Rejected(ApplyRejection::ConcentrationFull)
        ));

        assert!(scheduler.cancel(&effect, CancelReason::Explicit));
        assert!(!scheduler.cancel(&effect, CancelReason::Explicit));
        assert_eq!(caster.state().concentration, 50);
        assert!(caster.concentration().is_empty());
        assert!(world.registry().effects().is_empty());
    }

    #[test]
    fn test_dot_ticks_then_expires() {
        let world = world();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_npc("foe", foe_state());
        let dot = Arc::new(SpellDefinition {
            kind: SpellKind::DamageOverTime,
            damage: 10.0,
            duration: 8_000,
            frequency: 4_000,
            ..SpellDefinition::default()
        });
        let scheduler = world.scheduler();
        assert!(matches!(scheduler.apply(&caster, &foe, &dot, 1.0, 0), ApplyOutcome::Effect(_)));

        scheduler.tick(3_999);
        assert_eq!(foe.state().health, 1000);
        scheduler.tick(4_000);
        let after_one = foe.state().health;
        assert!(after_one < 1000);
        scheduler.tick(8_000);
        assert!(foe.state().health < after_one);
        assert!(foe.effects_snapshot().is_empty());
        assert!(world.registry().effects().is_empty());
    }

    #[test]
    fn test_mez_state_follows_effect() {
        let world = world();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_npc("foe", foe_state());
        let mez = Arc::new(SpellDefinition { kind: SpellKind::Mesmerize, duration: 1_000, ..SpellDefinition::default() });
        assert!(matches!(world.scheduler().apply(&caster, &foe, &mez, 1.0, 0), ApplyOutcome::Effect(_)));
        assert!(foe.state().mezzed);
        world.scheduler().tick(1_000);
        assert!(!foe.state().mezzed);
    }

    #[test]
    fn test_pulse_cancel_paths() {
        let world = world();
        let bard = world.spawn_player("bard", LivingState { mana: 3, has_instrument: true, ..caster_state() });
        let song = Arc::new(SpellDefinition {
            id: SpellId(7),
            kind: SpellKind::Buff,
            target: TargetMode::SelfOnly,
            pulse: true,
            frequency: 1_000,
            pulse_power: 2,
            instrument_required: true,
            duration: 2_000,
            ..SpellDefinition::default()
        });
        let scheduler = world.scheduler();
        let pulse = scheduler.start_pulse(&bard, &song, &bard, 0);
        assert!(scheduler.find_pulse(&bard, &song).is_some());

        scheduler.tick(1_000);
        assert_eq!(bard.state().mana, 1);
        assert!(!pulse.is_cancelled());

        scheduler.tick(2_000);
        assert!(pulse.is_cancelled());
        assert!(scheduler.find_pulse(&bard, &song).is_none());

        bard.state_mut().mana = 100;
        let pulse = scheduler.start_pulse(&bard, &song, &bard, 2_000);
        bard.state_mut().has_instrument = false;
        scheduler.tick(3_000);
        assert!(pulse.is_cancelled());
    }

    #[test]
    fn test_resisted_sets_lockout() {
        let world = world();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_npc("foe", foe_state());
        let bolt = SpellDefinition { damage: 10.0, cast_time: 2_000, ..SpellDefinition::default() };
        world.scheduler().resisted(&caster, &foe, &bolt, 100);
        assert!(foe.state().is_interrupt_locked(200));
        assert_eq!(foe.state().interrupt_until, 100 + world.config().spell_interrupt_duration);

        let other = world.spawn_npc("other", foe_state());
        let snare = SpellDefinition { kind: SpellKind::Debuff, ..SpellDefinition::default() };
        world.scheduler().resisted(&caster, &other, &snare, 100);
        assert!(!other.state().is_interrupt_locked(200));
    }

    #[test]
    fn test_save_and_restore() {
        let spell = SpellDefinition { id: SpellId(5), kind: SpellKind::Buff, value: 3.0, duration: 60_000, ..SpellDefinition::default() };
        let world = World::builder().spells(realmcast_core::SpellBook::from_definitions([spell])).build();
        let caster = world.spawn_player("c", caster_state());
        let spell = world.spells().get(SpellId(5)).unwrap();
        let scheduler = world.scheduler();
        let ApplyOutcome::Effect(effect) = scheduler.apply(&caster, &caster, &spell, 1.0, 0) else {
            panic!("expected effect");
        };
        effect.set_var("charges", "2");
        let saved = scheduler.save(&effect, 20_000);
        scheduler.cancel(&effect, CancelReason::Explicit);

        let restored = scheduler.restore(&saved, 100_000).unwrap();
        assert_eq!(restored.remaining(100_000), Some(40_000));
        assert_eq!(restored.var("charges").as_deref(), Some("2"));
        assert_eq!(caster.effects_snapshot().len(), 1);

        let gone = EffectSnapshot { remaining: Some(0), ..saved };
        assert!(scheduler.restore(&gone, 0).is_none());
    }

    #[test]
    fn test_restore_respects_concentration_cap() {
        let aura = SpellDefinition { concentration: 10, effect_group: 1, ..(*buff(5, 10.0, 0)).clone() };
        let config = crate::SpellConfig { max_concentration_effects: 1, ..crate::SpellConfig::default() };
        let world =
            World::builder().config(config).spells(realmcast_core::SpellBook::from_definitions([aura])).build();
        let caster = world.spawn_player("c", caster_state());
        let ally = world.spawn_player("a", caster_state());
        let aura = world.spells().get(SpellId(5)).unwrap();
        let scheduler = world.scheduler();

        let ApplyOutcome::Effect(held) = scheduler.apply(&caster, &ally, &aura, 1.0, 0) else {
            panic!("expected effect");
        };
        let saved = scheduler.save(&held, 1_000);
        assert!(scheduler.restore(&saved, 2_000).is_none());
        assert_eq!(caster.concentration().len(), 1);
        assert_eq!(caster.state().concentration, 40);

        scheduler.cancel(&held, CancelReason::Explicit);
        assert_eq!(caster.state().concentration, 50);
        let restored = scheduler.restore(&saved, 2_000).unwrap();
        assert!(restored.is_concentration());
        assert_eq!(caster.concentration().len(), 1);
        assert_eq!(caster.state().concentration, 40);
    }

    #[test]
    fn test_death_releases_focus_held_on_others() {
        let world = world();
        let caster = world.spawn_player("c", LivingState { health: 10, ..caster_state() });
        let foe = world.spawn_npc("foe", foe_state());
        let focus = Arc::new(SpellDefinition {
            kind: SpellKind::Debuff,
            focus: true,
            duration: 60_000,
            ..SpellDefinition::default()
        });
        let ApplyOutcome::Effect(held) = world.scheduler().apply(&caster, &foe, &focus, 1.0, 0) else {
            panic!("expected effect");
        };
        assert!(world.scheduler().holds_focus(&caster, &focus));

        world.scheduler().release_all(&caster);
        assert!(held.is_cancelled());
        assert!(foe.effects_snapshot().is_empty());
        assert!(!world.scheduler().holds_focus(&caster, &focus));
    }

    struct FailingDamageFeed;

    impl Notifier for FailingDamageFeed {
        fn notify(&self, event: SpellEvent) {
            if matches!(event, SpellEvent::Damage { .. }) {
                panic!("damage feed down");
            }
        }
    }

    #[test]
    fn test_faulting_effect_is_removed_and_sweep_continues() {
        let world = World::builder()
            .notifier(FailingDamageFeed)
            .rng(ScriptedRandom::constant(1000).with_fraction(1.0))
            .build();
        let caster = world.spawn_player("c", caster_state());
        let foe = world.spawn_npc("foe", foe_state());
        let dot = Arc::new(SpellDefinition {
            kind: SpellKind::DamageOverTime,
            damage: 10.0,
            duration: 8_000,
            frequency: 4_000,
            ..SpellDefinition::default()
        });
        let ApplyOutcome::Effect(burning) = world.scheduler().apply(&caster, &foe, &dot, 1.0, 0) else {
            panic!("expected effect");
        };
        let ApplyOutcome::Effect(mez) = world.scheduler().apply(
            &caster,
            &foe,
            &Arc::new(SpellDefinition { kind: SpellKind::Mesmerize, duration: 4_000, ..SpellDefinition::default() }),
            1.0,
            0,
        ) else {
            panic!("expected effect");
        };

        let sweep = world.scheduler().tick(4_000);
        assert_eq!(sweep.processed, 2);
        assert_eq!(sweep.faults.len(), 1);
        assert!(matches!(&sweep.faults[0], SpellError::EffectFault { effect, .. } if *effect == burning.id()));
        assert!(burning.is_cancelled());
        assert!(mez.is_cancelled());
        assert!(!foe.state().mezzed);
        assert!(world.registry().effects().is_empty());

        assert!(world.scheduler().tick(8_000).faults.is_empty());
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let world = world();
        assert!(!world.scheduler().cancel_by_id(EffectId(u64::MAX), CancelReason::Explicit));
    }
}
