//! # Active Effects
//!
//! An [`ActiveEffect`] is a landed duration, concentration or pulse effect.
//! It is shared (`Arc`) between:
//!
//! - the owner's effect list (`Living::effects`)
//! - the registry's global effect list (expiry sweeps)
//! - the caster's concentration list, for concentration and pulse effects
//!
//! Identity and spell data are immutable. Timing lives behind a small mutex so
//! a sweep can reschedule a pulse without touching any entity lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use realmcast_shared::Tick;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::spell::{SpellDefinition, SpellId};

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of an active effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EffectId(pub u64);

impl EffectId {
    /// Allocates a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Mutable timing of an effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EffectTiming {
    /// Expiry tick; `None` for effects that last until cancelled.
    pub expires_at: Option<Tick>,
    /// Next pulse or periodic tick, if any.
    pub next_pulse: Option<Tick>,
    /// Pulses fired so far.
    pub pulses: u32,
    /// Set exactly once, by whichever path removes the effect first.
    pub cancelled: bool,
}

/// A landed, tracked effect.
#[derive(Debug)]
pub struct ActiveEffect {
    id: EffectId,
    spell: Arc<SpellDefinition>,
    caster: EntityId,
    owner: EntityId,
    effectiveness: f64,
    started_at: Tick,
    pulse_target: Option<EntityId>,
    timing: Mutex<EffectTiming>,
    vars: Mutex<BTreeMap<String, String>>,
}

impl ActiveEffect {
    /// Creates a duration effect on `owner`.
    ///
    /// `duration == 0` means the effect lasts until cancelled (concentration).
    /// Spells with a `frequency` get their first periodic tick scheduled.
    #[must_use]
    pub fn new(
        spell: Arc<SpellDefinition>,
        caster: EntityId,
        owner: EntityId,
        effectiveness: f64,
        started_at: Tick,
        duration: Tick,
    ) -> Self {
        let expires_at = (duration > 0).then(|| started_at + duration);
        let next_pulse = (spell.frequency > 0).then(|| started_at + spell.frequency);
        Self {
            id: EffectId::next(),
            spell,
            caster,
            owner,
            effectiveness,
            started_at,
            pulse_target: None,
            timing: Mutex::new(EffectTiming { expires_at, next_pulse, pulses: 0, cancelled: false }),
            vars: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates the pulse driver of a pulsing spell.
    ///
    /// It lives on the caster, never expires on its own and re-casts the spell
    /// at `target` every `frequency` ticks.
    #[must_use]
    pub fn pulse(spell: Arc<SpellDefinition>, caster: EntityId, target: EntityId, started_at: Tick) -> Self {
        let next_pulse = Some(started_at + spell.frequency.max(1));
        Self {
            id: EffectId::next(),
            spell,
            caster,
            owner: caster,
            effectiveness: 1.0,
            started_at,
            pulse_target: Some(target),
            timing: Mutex::new(EffectTiming { expires_at: None, next_pulse, pulses: 0, cancelled: false }),
            vars: Mutex::new(BTreeMap::new()),
        }
    }

    /// Effect id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// The spell that created the effect.
    #[inline]
    #[must_use]
    pub fn spell(&self) -> &Arc<SpellDefinition> {
        &self.spell
    }

    /// Who cast it.
    #[inline]
    #[must_use]
    pub fn caster(&self) -> EntityId {
        self.caster
    }

    /// Who carries it.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> EntityId {
        self.owner
    }

    /// Effectiveness at application time.
    #[inline]
    #[must_use]
    pub fn effectiveness(&self) -> f64 {
        self.effectiveness
    }

    /// Tick the effect started.
    #[inline]
    #[must_use]
    pub fn started_at(&self) -> Tick {
        self.started_at
    }

    /// Pulse drivers carry the target they re-cast at.
    #[inline]
    #[must_use]
    pub fn pulse_target(&self) -> Option<EntityId> {
        self.pulse_target
    }

    /// True for the pulse driver of a pulsing spell.
    #[inline]
    #[must_use]
    pub fn is_pulse(&self) -> bool {
        self.pulse_target.is_some()
    }

    /// Occupies a concentration slot of the caster.
    #[inline]
    #[must_use]
    pub fn is_concentration(&self) -> bool {
        self.spell.is_concentration()
    }

    /// Current timing.
    #[must_use]
    pub fn timing(&self) -> EffectTiming {
        *self.timing.lock()
    }

    /// Ticks left, `None` if the effect lasts until cancelled.
    #[must_use]
    pub fn remaining(&self, now: Tick) -> Option<Tick> {
        self.timing.lock().expires_at.map(|at| at.saturating_sub(now))
    }

    /// Expired at `now`?
    #[must_use]
    pub fn is_expired(&self, now: Tick) -> bool {
        self.timing.lock().expires_at.is_some_and(|at| at <= now)
    }

    /// Already cancelled?
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.timing.lock().cancelled
    }

    /// Marks the effect cancelled. Returns `true` only for the first caller,
    /// so concurrent cancel paths run the removal exactly once.
    pub fn mark_cancelled(&self) -> bool {
        let mut timing = self.timing.lock();
        if timing.cancelled {
            return false;
        }
        timing.cancelled = true;
        true
    }

    /// If a pulse is due at `now`, advances the schedule and returns `true`.
    pub fn take_due_pulse(&self, now: Tick) -> bool {
        let mut timing = self.timing.lock();
        match timing.next_pulse {
            Some(at) if at <= now && !timing.cancelled => {
                timing.next_pulse = Some(at + self.spell.frequency.max(1));
                timing.pulses += 1;
                true
            }
            _ => false,
        }
    }

    /// Sets a custom persisted property.
    pub fn set_var(&self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.lock().insert(key.into(), value.into());
    }

    /// Reads a custom persisted property.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<String> {
        self.vars.lock().get(key).cloned()
    }

    /// Serializable snapshot for persistence across a session boundary.
    #[must_use]
    pub fn snapshot(&self, now: Tick) -> EffectSnapshot {
        EffectSnapshot {
            spell: self.spell.id,
            caster: self.caster,
            owner: self.owner,
            effectiveness: self.effectiveness,
            remaining: self.remaining(now),
            pulse_target: self.pulse_target,
            vars: self.vars.lock().clone(),
        }
    }

    /// Restores the custom properties of a snapshot.
    pub fn restore_vars(&self, vars: &BTreeMap<String, String>) {
        self.vars.lock().extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Persistable form of an effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectSnapshot {
    /// Spell that created the effect.
    pub spell: SpellId,
    /// Original caster.
    pub caster: EntityId,
    /// Carrier.
    pub owner: EntityId,
    /// Effectiveness at application time.
    pub effectiveness: f64,
    /// Ticks left (`None` = until cancelled).
    pub remaining: Option<Tick>,
    /// Pulse target for pulse drivers.
    pub pulse_target: Option<EntityId>,
    /// Custom key/value properties.
    pub vars: BTreeMap<String, String>,
}
