//! # Combat Resolver
//!
//! The numeric core: to-hit, resist, damage, duration and cost.
//!
//! ## Data Flow
//!
//! ```text
//! Living ──snapshot──> Combatant ─┐
//!                                 ├─> CombatResolver ──> DamageOutcome
//! Living ──snapshot──> Combatant ─┘        │
//!                                    RandomSource
//! ```
//!
//! Entity state is copied into a [`Combatant`] first, so a formula never holds
//! an entity lock (self-casts would otherwise read-lock the same entity twice).
//! Everything here is deterministic given the random draws.

use realmcast_core::{
    ActiveEffect, CastingStats, CharacterClass, DamageType, EntityId, EntityRegistry, Living, PetKind,
    Realm, SpellDefinition, SpellKind, SpellLine,
};
use realmcast_shared::{
    Tick, BASE_TO_HIT, HIT_CHANCE_DAMAGE_THRESHOLD, LEVEL_MOD_FACTOR, MAX_CRIT_CHANCE,
    MAX_DURATION_FACTOR, MAX_SECONDARY_RESIST, MIN_SPELL_RANGE, MIN_VARIANCE, MIN_VARIANCE_CEILING,
    PURE_CASTER_BONUS,
};

use crate::config::SpellConfig;
use crate::rng::RandomSource;

// =============================================================================
// Combatant snapshot
// =============================================================================

/// Lock-free copy of the fields combat math reads.
#[derive(Clone, Debug)]
pub struct Combatant {
    /// Entity.
    pub id: EntityId,
    /// Player character.
    pub is_player: bool,
    /// Level.
    pub level: u8,
    /// Level cap.
    pub max_level: u8,
    /// Class.
    pub class: CharacterClass,
    /// Realm.
    pub realm: Realm,
    /// Pet kind (meaningful with an owner).
    pub pet_kind: PetKind,
    /// Current attacker count.
    pub attackers: u32,
    /// Piercing-magic to-hit bonus.
    pub piercing_magic: i32,
    /// Majestic-will effectiveness.
    pub majestic_will: f64,
    /// Maximum mana.
    pub max_mana: i32,
    /// Casting the next spell with quick cast.
    pub quick_cast: bool,
    /// Stats.
    pub stats: CastingStats,
    /// Controlling owner, one level deep.
    pub owner: Option<Box<Combatant>>,
}

impl Combatant {
    /// Copies the combat view of `living`, resolving its owner through `registry`.
    #[must_use]
    pub fn of(registry: &EntityRegistry, living: &Living) -> Self {
        let mut combatant = Self::without_owner(living);
        let owner_id = living.owner();
        combatant.owner = owner_id
            .and_then(|id| registry.get(id))
            .map(|owner| Box::new(Self::without_owner(&owner)));
        combatant
    }

    fn without_owner(living: &Living) -> Self {
        let state = living.state();
        Self {
            id: living.id(),
            is_player: living.is_player(),
            level: state.level,
            max_level: state.max_level,
            class: state.class,
            realm: state.realm,
            pet_kind: state.pet_kind,
            attackers: state.attackers,
            piercing_magic: state.piercing_magic,
            majestic_will: state.majestic_will,
            max_mana: state.max_mana,
            quick_cast: state.quick_cast,
            stats: state.stats.clone(),
            owner: None,
        }
    }

    /// A pet: an NPC with a controlling owner.
    #[must_use]
    pub fn is_pet(&self) -> bool {
        !self.is_player && self.owner.is_some()
    }

    /// The player owning this pet, if any.
    #[must_use]
    pub fn player_owner(&self) -> Option<&Combatant> {
        self.owner.as_deref().filter(|owner| owner.is_player)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a damage roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DamageOutcome {
    /// Damage after resists and cap.
    pub damage: i32,
    /// Additional critical damage.
    pub critical: i32,
    /// Net resist adjustment applied (negative = removed by resists).
    pub resist_modifier: i32,
    /// Damage type.
    pub damage_type: DamageType,
}

impl DamageOutcome {
    /// Damage plus critical damage.
    #[must_use]
    pub const fn total(&self) -> i32 {
        self.damage + self.critical
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Combat formulas bound to a configuration and a random source.
#[derive(Clone, Copy)]
pub struct CombatResolver<'a> {
    config: &'a SpellConfig,
    rng: &'a dyn RandomSource,
}

impl<'a> CombatResolver<'a> {
    /// Binds the formulas to `config` and `rng`.
    #[must_use]
    pub fn new(config: &'a SpellConfig, rng: &'a dyn RandomSource) -> Self {
        Self { config, rng }
    }

    /// Chance in percent that `spell` lands on `target`.
    ///
    /// Not clamped: values below 0 or above 100 are legal here and only
    /// clamped where they are used.
    #[must_use]
    pub fn to_hit_chance(&self, caster: &Combatant, target: &Combatant, spell: &SpellDefinition) -> i32 {
        // Pets use their owner's spell-level bonus.
        let source = caster.owner.as_deref().unwrap_or(caster);
        let mut spell_level = i32::from(spell.level) + source.stats.spell_level_bonus;
        if source.is_player {
            spell_level = spell_level.min(i32::from(source.max_level));
            if spell.line == SpellLine::CombatStyles {
                spell_level = i32::from(source.max_level.min(target.level));
            }
        }

        let target_level = i32::from(target.level);
        let mut hit = if caster.is_player {
            let mut hit = BASE_TO_HIT + (spell_level - target_level) / 2 + caster.stats.to_hit_bonus;
            if !target.is_player {
                let con = f64::from(con_level(caster.level, target.level).min(3));
                hit -= (con * self.config.pve_spell_con_hit_percent) as i32;
                hit += target.attackers.saturating_sub(1) as i32 * self.config.missrate_reduction_per_attacker;
            }
            hit
        } else {
            (87.5 - f64::from(target_level - i32::from(caster.level))) as i32
        };

        hit += caster.piercing_magic;
        hit += caster.majestic_will as i32 * 5;
        hit
    }

    /// Chance in percent that `target` resists `spell`.
    #[must_use]
    pub fn resist_chance(&self, caster: &Combatant, target: &Combatant, spell: &SpellDefinition) -> i32 {
        if spell.has_positive_effect() {
            return 0;
        }
        if spell.line == SpellLine::ItemEffects && caster.is_player {
            if let Some(item_level) = spell.item_level {
                let item_level = i32::from(item_level.min(caster.max_level));
                return 100 - (85 + (item_level - i32::from(target.level)) / 2);
            }
        }
        100 - self.to_hit_chance(caster, target, spell)
    }

    /// Rolls the resist check. `true` means the spell was resisted.
    ///
    /// Nothing is drawn when the chance is not positive, so a player's deck
    /// only advances on real rolls.
    #[must_use]
    pub fn roll_resist(&self, caster: &Combatant, target: &Combatant, spell: &SpellDefinition) -> bool {
        let chance = self.resist_chance(caster, target, spell);
        if chance <= 0 {
            return false;
        }
        let roll = self.rng.resist_roll(caster.id, caster.is_player);
        tracing::debug!("resist roll {} vs {}% for {} on {}", roll, chance, spell.id, target.id);
        roll < chance
    }

    /// Damage variance band `(min, max)` as fractions of the base damage.
    #[must_use]
    pub fn damage_variance(&self, caster: &Combatant, target: &Combatant, spell: &SpellDefinition) -> (f64, f64) {
        match spell.line {
            SpellLine::ItemEffects | SpellLine::MobSpells => return (0.75, 1.0),
            SpellLine::CombatStyles => return (if spell.use_min_variance { 1.0 } else { 0.75 }, 1.0),
            SpellLine::Reserved => return (1.0, 1.0),
            SpellLine::Normal | SpellLine::Potions => {}
        }

        let spec_level = if let Some(owner) = caster.owner.as_deref().filter(|_| caster.is_pet()) {
            i32::from(owner.level)
        } else if caster.is_player {
            caster.stats.modified_spec
        } else {
            1
        };

        let mut min = MIN_VARIANCE;
        let mut max = 1.0;
        if target.level > 0 {
            min = (f64::from(spec_level - 1) / f64::from(target.level)).min(1.0);
        }

        let level_source = if caster.is_player { Some(caster) } else { caster.owner.as_deref() };
        if let Some(source) = level_source {
            let delta = LEVEL_MOD_FACTOR * f64::from(i32::from(source.level) - i32::from(target.level));
            min += delta;
            max += delta;
        }

        let max = max.max(MIN_VARIANCE_CEILING);
        let min = min.min(max).max(MIN_VARIANCE);
        (min, max)
    }

    /// Base (100%) damage before variance.
    #[must_use]
    pub fn damage_base(&self, caster: &Combatant, spell: &SpellDefinition) -> f64 {
        let mut damage = spell.damage;
        if let SpellKind::Lifedrain { return_permille } = spell.kind {
            damage *= 1.0 + f64::from(return_permille) * 0.001;
        }

        if let Some(owner) = caster.player_owner().filter(|_| caster.is_pet()) {
            if self.config.pet_scale_spell_max_level == 0 {
                damage = cap_pet_spell_damage(damage, owner.level);
            }
            damage *= match caster.pet_kind {
                PetKind::Necromantic => f64::from(owner.stats.mana_stat - i32::from(owner.level)) * 0.005 + 1.0,
                PetKind::Standard => {
                    f64::from(caster.stats.intelligence + 125 + owner.stats.intelligence / 2) / 275.0
                }
            };
            damage *= 1.0 + f64::from(owner.stats.modified_spec - owner.stats.base_spec) * 0.005;
        } else if caster.is_player {
            let casting_line = !matches!(spell.line, SpellLine::CombatStyles | SpellLine::ItemEffects);
            if caster.stats.mana_stat > 0 && casting_line {
                damage *= f64::from(caster.stats.mana_stat - i32::from(caster.level)) * 0.005 + 1.0;
                damage *= 1.0 + f64::from(caster.stats.modified_spec - caster.stats.base_spec) * 0.005;
                if caster.class.is_pure_caster() {
                    damage *= PURE_CASTER_BONUS;
                }
                damage = damage.max(spell.damage);
            }
        } else {
            damage = cap_npc_spell_damage(damage, caster.level) * f64::from(caster.stats.intelligence + 200) / 275.0;
        }

        damage.max(0.0)
    }

    /// Rolls a full damage outcome of `spell` from `caster` on `target`.
    #[must_use]
    pub fn resolve_damage(
        &self,
        caster: &Combatant,
        target: &Combatant,
        spell: &SpellDefinition,
        effectiveness: f64,
    ) -> DamageOutcome {
        let mut effectiveness = effectiveness;
        let mut base = self.damage_base(caster, spell);
        if caster.is_player {
            effectiveness += f64::from(caster.stats.spell_damage_pct) * 0.01;
            // Relic bonus raises damage but not the cap.
            base *= 1.0 + caster.stats.relic_bonus;
        }
        base *= caster.stats.effectiveness;

        let (min, max) = self.damage_variance(caster, target, spell);
        let low = (min * base) as i32;
        let high = (max * base) as i32;
        let mut damage = self.rng.int_inclusive(low, high);

        let hit = self.to_hit_chance(caster, target, spell);
        damage = adjust_damage_for_hit_chance(damage, hit, self.config.spell_hit_chance_damage_reduction_multiplier);
        damage = (f64::from(damage) * effectiveness) as i32;

        let realm_pet = caster.is_pet() && !caster.realm.is_neutral();
        if caster.is_player || realm_pet {
            let multiplier = if target.is_player { self.config.pvp_spell_damage } else { self.config.pve_spell_damage };
            damage = (f64::from(damage) * multiplier) as i32;
        }
        damage = damage.max(0);

        let slot = spell.damage_type.index();
        let resists = &target.stats.resists;
        let pierce = caster.stats.resist_pierce.max(0);
        let primary = resists.primary[slot] - resists.item_bonus[slot].min(pierce).max(0);
        let secondary = resists.secondary[slot].min(MAX_SECONDARY_RESIST);

        let mut resist_modifier = (f64::from(damage) * f64::from(primary) * -0.01) as i32;
        resist_modifier += (f64::from(damage + resist_modifier) * f64::from(secondary) * -0.01) as i32;
        damage += resist_modifier;

        let cap = self.config.damage_cap_multiplier * spell.damage * effectiveness;
        if f64::from(damage) > cap {
            damage = cap as i32;
        }
        damage = damage.max(0);

        let crit_chance = if spell.kind == SpellKind::DamageOverTime {
            0
        } else {
            caster.stats.crit_chance.min(MAX_CRIT_CHANCE)
        };
        let roll = self.rng.int_inclusive(1, 100);
        let critical = if crit_chance > roll && damage >= 1 {
            let crit_max = if target.is_player { damage / 2 } else { damage };
            self.rng.int_inclusive(damage / 10, crit_max)
        } else {
            0
        };

        DamageOutcome { damage, critical, resist_modifier, damage_type: spell.damage_type }
    }

    /// Heal amount of a heal spell.
    #[must_use]
    pub fn heal_amount(&self, caster: &Combatant, spell: &SpellDefinition, effectiveness: f64) -> i32 {
        let (min, max) = if spell.line == SpellLine::Reserved { (1.0, 1.0) } else { (0.75, 1.0) };
        let base = spell.value * caster.stats.effectiveness * effectiveness;
        self.rng.uniform(min * base, max * base).round() as i32
    }

    /// Duration of an effect of `spell` at `effectiveness`.
    ///
    /// Zero for spells without a duration, otherwise clamped to
    /// `1..=4 * spell.duration`.
    #[must_use]
    pub fn effect_duration(&self, caster: &Combatant, spell: &SpellDefinition, effectiveness: f64) -> Tick {
        if spell.duration == 0 {
            return 0;
        }
        let nominal = spell.duration as f64;
        let duration = nominal * (1.0 + f64::from(caster.stats.spell_duration_pct) * 0.01) * effectiveness;
        duration.clamp(1.0, nominal * MAX_DURATION_FACTOR) as Tick
    }

    /// Mana cost of casting `spell`.
    #[must_use]
    pub fn power_cost(&self, caster: &Combatant, spell: &SpellDefinition) -> i32 {
        let mut base = f64::from(spell.power);
        if base < 0.0 {
            base = f64::from(caster.max_mana) * base * -0.01;
        }
        if !caster.is_player {
            return base as i32;
        }

        let focus = caster.stats.focus_bonus.clamp(0.0, 0.4);
        let mut power = base * 1.2 - base * focus;
        if caster.quick_cast && !spell.is_instant() {
            power *= 2.0;
        }
        power as i32
    }

    /// Interrupt chance in percent of an attack by `attacker` on a casting `caster`.
    #[must_use]
    pub fn interrupt_chance(&self, caster: &Combatant, attacker: &Combatant) -> i32 {
        if attacker.is_player {
            return 99;
        }
        (self.config.base_interrupt_chance + 10 * con_level(caster.level, attacker.level)).clamp(1, 99)
    }

    /// Rolls the interrupt check.
    #[must_use]
    pub fn roll_interrupt(&self, caster: &Combatant, attacker: &Combatant) -> bool {
        self.rng.chance(self.interrupt_chance(caster, attacker))
    }
}

// =============================================================================
// Free formulas
// =============================================================================

/// Con level of `to` as seen from `from`: level difference in con steps.
#[must_use]
pub fn con_level(from: u8, to: u8) -> i32 {
    let step = (i32::from(from) / 10 + 1).max(1);
    (i32::from(to) - i32::from(from)) / step
}

/// Reduces damage when the hit chance is below 55%. Never returns less than 1.
#[must_use]
pub fn adjust_damage_for_hit_chance(damage: i32, hit_chance: i32, multiplier: f64) -> i32 {
    let mut adjusted = damage;
    if hit_chance < HIT_CHANCE_DAMAGE_THRESHOLD {
        adjusted += (f64::from(adjusted) * f64::from(hit_chance - HIT_CHANCE_DAMAGE_THRESHOLD) * multiplier * 0.01) as i32;
    }
    adjusted.max(1)
}

/// Damage cap of pets of a player below level 50.
#[must_use]
pub fn cap_pet_spell_damage(damage: f64, owner_level: u8) -> f64 {
    let level = f64::from(owner_level);
    let mut capped = damage;
    if owner_level < 13 {
        capped = 4.1 * level;
    }
    if owner_level < 50 {
        capped = 3.8 * level;
    }
    damage.min(capped)
}

/// Damage cap of NPCs below level 50.
#[must_use]
pub fn cap_npc_spell_damage(damage: f64, level: u8) -> f64 {
    if level < 50 {
        damage.min(4.7 * f64::from(level))
    } else {
        damage
    }
}

/// Cast range of `spell` for a caster with `range_pct` spell range.
#[must_use]
pub fn spell_range(spell: &SpellDefinition, range_pct: i32) -> f32 {
    (spell.range * range_pct as f32 / 100.0).trunc().max(MIN_SPELL_RANGE)
}

/// `true` if effects of `new` and `old` share a group and cannot stack.
#[must_use]
pub fn is_overwritable(new: &SpellDefinition, old: &SpellDefinition) -> bool {
    if new.effect_group != 0 || old.effect_group != 0 {
        return new.effect_group == old.effect_group;
    }
    new.kind == old.kind
}

/// `true` if a new effect lasting `new_duration` should replace `old`.
#[must_use]
pub fn is_new_effect_better(old: &ActiveEffect, new: &SpellDefinition, new_duration: Tick, now: Tick) -> bool {
    let old_spell = old.spell();
    if old_spell.is_concentration() {
        return false;
    }
    if new.damage < old_spell.damage || new.value < old_spell.value {
        return false;
    }
    if !new.is_concentration() {
        if let Some(remaining) = old.remaining(now) {
            if new_duration <= remaining {
                return false;
            }
        }
    }
    true
}
