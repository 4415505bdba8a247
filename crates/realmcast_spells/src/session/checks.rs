//! Legality checks run before, during and at the end of a cast.
//!
//! | check                         | begin | during | end |
//! |-------------------------------|:-----:|:------:|:---:|
//! | alive / active / able to cast |   x   |   x    |  x  |
//! | toggle off own running pulse  |   x   |        |     |
//! | selective blindness, immunity |   x   |        |  x  |
//! | instrument / sitting          |   x   |   x    |  x  |
//! | interrupt lockout, cooldown   |   x   |        |     |
//! | target mode legality          |   x   |   x    |  x  |
//! | target range                  |   x   |  pet   |  x  |
//! | power / concentration         |   x   |   x    |  x  |
//! | moving                        |       |   x    |     |

use std::sync::Arc;

use realmcast_core::{CooldownKey, EntityId, Living, SpellDefinition, SpellKind, TargetMode};
use realmcast_shared::{Tick, Vec3, ENEMY_VIEW_ANGLE, TICKS_PER_SECOND};
use thiserror::Error;

use crate::resolver::spell_range;
use crate::world::World;

/// A rule that refused a cast. The message is what the caster is told.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CastRejection {
    /// Caster is dead.
    #[error("You are dead and can't cast!")]
    Dead,

    /// Caster is not in the world.
    #[error("You can't cast right now.")]
    Inactive,

    /// Caster is silenced.
    #[error("You are silenced and can't cast!")]
    Silenced,

    /// Caster is stunned or mesmerized.
    #[error("You can't cast while incapacitated!")]
    Incapacitated,

    /// Re-casting a running pulse toggled it off.
    #[error("You cancel your effect.")]
    EffectCancelled,

    /// Re-casting a running song toggled it off.
    #[error("You stop playing your song.")]
    SongStopped,

    /// Selective blindness hides the target.
    #[error("{0} is invisible to you!")]
    InvisibleTarget(String),

    /// Target is immune to single-target direct damage.
    #[error("{0} is immune to this effect!")]
    TargetImmune(String),

    /// Songs need an instrument.
    #[error("You are not wielding the right type of instrument!")]
    WrongInstrument,

    /// Only songs can be played sitting.
    #[error("You can't cast while sitting!")]
    Sitting,

    /// An interrupt lockout is running.
    #[error("You must wait {seconds} seconds to cast a spell!")]
    InterruptLocked {
        /// Seconds left, rounded up.
        seconds: Tick,
    },

    /// The recast timer is running.
    #[error("You must wait {seconds} seconds to use this spell!")]
    Cooldown {
        /// Seconds left, rounded up.
        seconds: Tick,
    },

    /// Pet spells need a controlled pet.
    #[error("You must cast this spell on a creature you are controlling.")]
    NoPet,

    /// Ground target missing or out of range.
    #[error("Your area target is out of range.  Select a closer target.")]
    GroundTargetTooFar,

    /// No usable target.
    #[error("You must select a target for this spell!")]
    NoTarget,

    /// Target out of spell range.
    #[error("That target is too far away!")]
    TargetTooFar,

    /// Harmful spell on oneself.
    #[error("You can't attack yourself!")]
    AttackSelf,

    /// Target cannot be affected at all (shade form).
    #[error("Invalid target.")]
    InvalidTarget,

    /// Target is behind the caster.
    #[error("Your target is not in view!")]
    TargetNotInView,

    /// Target is out of line of sight.
    #[error("Your target is not visible!")]
    TargetNotVisible,

    /// Hostility rule forbids attacking the target.
    #[error("You can't attack {0}.")]
    NotAttackable(String),

    /// Friendly spell on a hostile target.
    #[error("{0} is not a member of your realm.")]
    NotFriendly(String),

    /// Corpse spells need a dead realm mate.
    #[error("This spell only works on dead members of your realm!")]
    NotDeadRealmMember,

    /// Target is dead.
    #[error("{0} is dead!")]
    TargetDead(String),

    /// Not enough mana for the cost.
    #[error("You don't have enough power to cast that!")]
    NoPower,

    /// Mana fully spent while casting.
    #[error("You have exhausted all of your power and cannot cast spells!")]
    PowerExhausted,

    /// Not enough concentration points.
    #[error("This spell requires {needed} concentration points to cast!")]
    Concentration {
        /// Points the spell costs.
        needed: i32,
    },

    /// Concentration list is full.
    #[error("You can only cast up to {max} simultaneous concentration spells!")]
    ConcentrationFull {
        /// Configured maximum.
        max: usize,
    },

    /// A channeled cast is running and spell queueing is off.
    #[error("You are already casting a spell!")]
    AlreadyCasting,

    /// Caster moved mid-cast.
    #[error("You move and interrupt your spellcast!")]
    Moved,
}

impl CastRejection {
    /// Rejections the caster is not told about.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Inactive)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Begin,
    During,
    End,
}

/// The caster state the checks read, copied so no lock is held while other
/// entities are inspected.
struct CasterView {
    alive: bool,
    active: bool,
    silenced: bool,
    incapacitated: bool,
    sitting: bool,
    has_instrument: bool,
    moving: bool,
    move_cast: bool,
    quick_cast: bool,
    mana: i32,
    concentration: i32,
    lockout_left: Option<Tick>,
    cooldown_left: Option<Tick>,
    blinded_to: Option<EntityId>,
    ground_target: Option<Vec3>,
    position: Vec3,
    heading: f32,
    range_pct: i32,
}

impl CasterView {
    fn of(caster: &Living, spell: &SpellDefinition, now: Tick) -> Self {
        let state = caster.state();
        let lockout_left = state.is_interrupt_locked(now).then(|| state.interrupt_until - now);
        let cooldown_left = state
            .is_on_cooldown(spell.id, spell.shared_timer_group, now)
            .then(|| {
                state
                    .cooldowns
                    .iter()
                    .filter(|(key, _)| match key {
                        CooldownKey::Spell(id) => *id == spell.id,
                        CooldownKey::Group(group) => {
                            spell.shared_timer_group != 0 && *group == spell.shared_timer_group
                        }
                    })
                    .map(|(_, &until)| until.saturating_sub(now))
                    .max()
                    .unwrap_or(0)
            });
        Self {
            alive: state.alive,
            active: state.active,
            silenced: state.silenced,
            incapacitated: state.stunned || state.mezzed,
            sitting: state.sitting,
            has_instrument: state.has_instrument,
            moving: state.moving || state.strafing,
            move_cast: state.move_cast,
            quick_cast: state.quick_cast,
            mana: state.mana,
            concentration: state.concentration,
            lockout_left,
            cooldown_left,
            blinded_to: state.blinded_to,
            ground_target: state.ground_target,
            position: state.position,
            heading: state.heading,
            range_pct: state.stats.spell_range_pct,
        }
    }
}

const fn seconds_left(ticks: Tick) -> Tick {
    ticks / TICKS_PER_SECOND + 1
}

/// Checks before the cast starts. May cancel a running pulse of the same spell.
pub(crate) fn begin(
    world: &World,
    caster: &Arc<Living>,
    spell: &SpellDefinition,
    target: Option<&Arc<Living>>,
    now: Tick,
) -> Result<(), CastRejection> {
    validate(world, caster, spell, target, Phase::Begin, now)
}

/// Lighter checks every tick while channeling.
pub(crate) fn during(
    world: &World,
    caster: &Arc<Living>,
    spell: &SpellDefinition,
    target: Option<&Arc<Living>>,
    now: Tick,
) -> Result<(), CastRejection> {
    validate(world, caster, spell, target, Phase::During, now)
}

/// Checks when the cast completes.
pub(crate) fn end(
    world: &World,
    caster: &Arc<Living>,
    spell: &SpellDefinition,
    target: Option<&Arc<Living>>,
    now: Tick,
) -> Result<(), CastRejection> {
    validate(world, caster, spell, target, Phase::End, now)
}

fn validate(
    world: &World,
    caster: &Arc<Living>,
    spell: &SpellDefinition,
    target: Option<&Arc<Living>>,
    phase: Phase,
    now: Tick,
) -> Result<(), CastRejection> {
    let me = CasterView::of(caster, spell, now);

    if !me.alive {
        return Err(CastRejection::Dead);
    }
    if !me.active {
        return Err(CastRejection::Inactive);
    }

    if phase == Phase::Begin && spell.is_pulsing() {
        let scheduler = world.scheduler();
        if let Some(pulse) = scheduler.find_pulse(caster, spell) {
            scheduler.cancel(&pulse, crate::events::CancelReason::Explicit);
            return Err(if spell.instrument_required {
                CastRejection::SongStopped
            } else {
                CastRejection::EffectCancelled
            });
        }
    }

    if me.silenced {
        return Err(CastRejection::Silenced);
    }
    if me.incapacitated {
        return Err(CastRejection::Incapacitated);
    }

    if phase != Phase::During {
        if let Some(target) = target {
            if spell.range > 0.0 && me.blinded_to == Some(target.id()) {
                return Err(CastRejection::InvisibleTarget(target.name().to_owned()));
            }
            let immune = target.state().damage_immune;
            if immune && spell.kind == SpellKind::DirectDamage && spell.radius <= 0.0 {
                return Err(CastRejection::TargetImmune(target.name().to_owned()));
            }
        }
    }

    if spell.instrument_required {
        if !me.has_instrument {
            return Err(CastRejection::WrongInstrument);
        }
    } else if me.sitting {
        return Err(CastRejection::Sitting);
    }

    if phase == Phase::Begin {
        let interruptible = !spell.uninterruptible && !spell.is_instant() && !me.quick_cast;
        if let Some(left) = me.lockout_left.filter(|_| interruptible) {
            return Err(CastRejection::InterruptLocked { seconds: seconds_left(left) });
        }
        if let Some(left) = me.cooldown_left {
            return Err(CastRejection::Cooldown { seconds: seconds_left(left) });
        }
    }

    check_target(world, caster, &me, spell, target, phase)?;

    if phase == Phase::During && me.mana <= 0 && spell.power > 0 {
        return Err(CastRejection::PowerExhausted);
    }
    if spell.power != 0 && !me.quick_cast {
        let cost = world.resolver().power_cost(&world.combatant(caster), spell);
        if me.mana < cost {
            return Err(CastRejection::NoPower);
        }
    }

    if spell.is_concentration() {
        if me.concentration < spell.concentration {
            return Err(CastRejection::Concentration { needed: spell.concentration });
        }
        let max = world.config().max_concentration_effects;
        if caster.concentration().len() >= max {
            return Err(CastRejection::ConcentrationFull { max });
        }
    }

    if phase == Phase::During && me.moving && !me.move_cast && !spell.move_cast && !spell.instrument_required {
        return Err(CastRejection::Moved);
    }

    Ok(())
}

fn check_target(
    world: &World,
    caster: &Arc<Living>,
    me: &CasterView,
    spell: &SpellDefinition,
    target: Option<&Arc<Living>>,
    phase: Phase,
) -> Result<(), CastRejection> {
    let range = spell_range(spell, me.range_pct);

    match spell.target {
        TargetMode::Pet => {
            let Some(pet) = target.filter(|t| t.owner() == Some(caster.id())) else {
                return Err(CastRejection::NoPet);
            };
            if phase == Phase::During && spell.range > 0.0 && !me.position.within(pet.position(), range) {
                return Err(CastRejection::TargetTooFar);
            }
            return Ok(());
        }
        TargetMode::Area => {
            return match me.ground_target {
                Some(ground) if me.position.within(ground, range) => Ok(()),
                _ => Err(CastRejection::GroundTargetTooFar),
            };
        }
        TargetMode::SelfOnly | TargetMode::Group | TargetMode::Cone | TargetMode::BdSubPet => return Ok(()),
        TargetMode::Enemy | TargetMode::Realm | TargetMode::Corpse => {}
    }
    if spell.range <= 0.0 {
        return Ok(());
    }

    let Some(target) = target.filter(|t| t.is_active()) else {
        return Err(CastRejection::NoTarget);
    };
    if phase != Phase::During && !me.position.within(target.position(), range) {
        return Err(CastRejection::TargetTooFar);
    }

    match spell.target {
        TargetMode::Enemy => {
            let in_view = |world: &World| {
                me.position.is_in_front(me.heading, target.position(), ENEMY_VIEW_ANGLE)
                    && world.sight().can_see(caster, target)
            };
            if phase == Phase::During {
                let watched = caster.is_player() && !(spell.is_pulsing() && spell.is_mesmerize());
                if watched && !in_view(world) {
                    return Err(CastRejection::TargetNotInView);
                }
            } else {
                if target.id() == caster.id() {
                    return Err(CastRejection::AttackSelf);
                }
                if target.state().shade {
                    return Err(CastRejection::InvalidTarget);
                }
                if !me.position.is_in_front(me.heading, target.position(), ENEMY_VIEW_ANGLE) {
                    return Err(CastRejection::TargetNotInView);
                }
                if !world.sight().can_see(caster, target) {
                    return Err(CastRejection::TargetNotVisible);
                }
            }
            if !world.hostility().is_allowed_to_attack(caster, target) {
                return Err(CastRejection::NotAttackable(target.name().to_owned()));
            }
        }
        TargetMode::Corpse => {
            if target.is_alive() || target.realm() != caster.realm() {
                return Err(CastRejection::NotDeadRealmMember);
            }
        }
        TargetMode::Realm => {
            if world.hostility().is_allowed_to_attack(caster, target) {
                return Err(CastRejection::NotFriendly(target.name().to_owned()));
            }
        }
        _ => {}
    }

    if phase != Phase::During && spell.target != TargetMode::Corpse && !target.is_alive() {
        return Err(CastRejection::TargetDead(target.name().to_owned()));
    }
    Ok(())
}
