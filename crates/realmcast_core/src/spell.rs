//! # Spell Definitions
//!
//! Immutable, shared descriptions of spells. Every cast of a spell points at
//! the same `Arc<SpellDefinition>`.
//!
//! Behaviour is selected by [`SpellKind`], a plain data enum. The casting
//! pipeline dispatches on it with `match`; there is no handler hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use realmcast_shared::{Tick, DEFAULT_CONE_ANGLE};
use serde::{Deserialize, Serialize};

use crate::entity::DamageType;

/// Spell identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpellId(pub u32);

impl std::fmt::Display for SpellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "spell {}", self.0)
    }
}

/// What a spell does once it lands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpellKind {
    /// One-shot damage.
    #[default]
    DirectDamage,
    /// Damage every `frequency` ticks for the duration.
    DamageOverTime,
    /// Direct damage that returns part of it to the caster as health.
    Lifedrain {
        /// Returned share in permille of the damage dealt.
        return_permille: i32,
    },
    /// Restores `value` health.
    Heal,
    /// Beneficial stat effect for the duration.
    Buff,
    /// Harmful stat effect for the duration.
    Debuff,
    /// Mesmerizes the target for the duration.
    Mesmerize,
    /// Stuns the target for the duration.
    Stun,
    /// Brings a dead same-realm target back to life.
    Resurrect,
    /// Adds `value` to the owner's spell to-hit chance for the duration.
    PiercingMagic,
}

impl SpellKind {
    /// Harmful spells are resisted, trigger aggro and need a hostile target.
    #[must_use]
    pub const fn is_harmful(self) -> bool {
        matches!(
            self,
            Self::DirectDamage
                | Self::DamageOverTime
                | Self::Lifedrain { .. }
                | Self::Debuff
                | Self::Mesmerize
                | Self::Stun
        )
    }

    /// Deals damage directly on landing.
    #[must_use]
    pub const fn is_direct_damage(self) -> bool {
        matches!(self, Self::DirectDamage | Self::Lifedrain { .. })
    }

    /// Deals damage at all.
    #[must_use]
    pub const fn is_damage(self) -> bool {
        matches!(self, Self::DirectDamage | Self::DamageOverTime | Self::Lifedrain { .. })
    }

    /// Beneficial duration effect.
    #[must_use]
    pub const fn is_buff(self) -> bool {
        matches!(self, Self::Buff | Self::PiercingMagic)
    }

    /// Restores health.
    #[must_use]
    pub const fn is_heal(self) -> bool {
        matches!(self, Self::Heal)
    }
}

/// Spell line. Some lines use fixed damage variance bands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellLine {
    /// Any trained spell line.
    #[default]
    Normal,
    /// Procs and charges from items.
    ItemEffects,
    /// Effects triggered by combat styles.
    CombatStyles,
    /// Reserved effects (no variance).
    Reserved,
    /// Spells cast by mobs.
    MobSpells,
    /// Potion effects.
    Potions,
}

/// How a spell chooses its targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// The caster (and allies in radius when a radius is set).
    #[serde(rename = "self")]
    SelfOnly,
    /// The caster's group and their pets.
    Group,
    /// The caster's controlled pet.
    Pet,
    /// The sub-pets commanded by the caster's pet.
    #[serde(rename = "bdsubpet")]
    BdSubPet,
    /// A hostile target (or every hostile in radius).
    #[default]
    Enemy,
    /// A friendly target (or every friendly in radius).
    Realm,
    /// Every eligible entity around the ground target.
    Area,
    /// Every eligible entity in a frontal cone.
    Cone,
    /// A dead same-realm target.
    Corpse,
}

/// Immutable description of a spell.
///
/// All durations and delays are in clock ticks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpellDefinition {
    /// Identifier.
    pub id: SpellId,
    /// Display name.
    pub name: String,
    /// Behaviour.
    pub kind: SpellKind,
    /// Line the spell belongs to.
    pub line: SpellLine,
    /// Targeting mode.
    pub target: TargetMode,
    /// Spell level.
    pub level: u8,
    /// Cast range (0 = point blank).
    pub range: f32,
    /// Effect radius (0 = single target).
    pub radius: f32,
    /// Cast time (0 = instant).
    pub cast_time: Tick,
    /// Power cost; negative values are a percentage of maximum mana.
    pub power: i32,
    /// Concentration cost (0 = not a concentration spell).
    pub concentration: i32,
    /// Nominal damage.
    pub damage: f64,
    /// Generic magnitude (heal amount, buff value...).
    pub value: f64,
    /// Effect duration (0 = instantaneous).
    pub duration: Tick,
    /// Pulse or damage-over-time interval.
    pub frequency: Tick,
    /// Re-casts itself every `frequency` ticks while maintained.
    pub pulse: bool,
    /// Power paid per pulse.
    pub pulse_power: i32,
    /// Recast delay.
    pub recast_delay: Tick,
    /// Shared recast timer group (0 = none).
    pub shared_timer_group: u32,
    /// Effect group for overwrite rules (0 = by kind).
    pub effect_group: u32,
    /// Damage type.
    pub damage_type: DamageType,
    /// Cone width in degrees (0 = default cone).
    pub cone_angle: f32,
    /// Channeled until the caster moves.
    pub focus: bool,
    /// Attacks never interrupt this spell.
    pub uninterruptible: bool,
    /// May be cast while moving.
    pub move_cast: bool,
    /// Needs an instrument in hand.
    pub instrument_required: bool,
    /// Use the tighter variance band for combat-style effects.
    pub use_min_variance: bool,
    /// Spells cast on the same target after this one.
    pub sub_spells: Vec<SpellId>,
    /// Level of the item carrying this effect, for item procs.
    pub item_level: Option<u8>,
}

impl Default for SpellDefinition {
    fn default() -> Self {
        Self {
            id: SpellId(0),
            name: String::new(),
            kind: SpellKind::DirectDamage,
            line: SpellLine::Normal,
            target: TargetMode::Enemy,
            level: 1,
            range: 1500.0,
            radius: 0.0,
            cast_time: 0,
            power: 0,
            concentration: 0,
            damage: 0.0,
            value: 0.0,
            duration: 0,
            frequency: 0,
            pulse: false,
            pulse_power: 0,
            recast_delay: 0,
            shared_timer_group: 0,
            effect_group: 0,
            damage_type: DamageType::Heat,
            cone_angle: 0.0,
            focus: false,
            uninterruptible: false,
            move_cast: false,
            instrument_required: false,
            use_min_variance: false,
            sub_spells: Vec::new(),
            item_level: None,
        }
    }
}

impl SpellDefinition {
    /// Zero cast time.
    #[inline]
    #[must_use]
    pub const fn is_instant(&self) -> bool {
        self.cast_time == 0
    }

    /// Pulsing spells keep re-casting while maintained.
    #[inline]
    #[must_use]
    pub const fn is_pulsing(&self) -> bool {
        self.pulse && self.frequency > 0
    }

    /// Occupies a concentration slot.
    #[inline]
    #[must_use]
    pub const fn is_concentration(&self) -> bool {
        self.concentration > 0
    }

    /// Helps its target.
    #[inline]
    #[must_use]
    pub const fn has_positive_effect(&self) -> bool {
        !self.kind.is_harmful()
    }

    /// Point-blank area: radius around the caster.
    #[inline]
    #[must_use]
    pub fn is_point_blank_area(&self) -> bool {
        self.radius > 0.0 && self.range <= 0.0
    }

    /// Cone width, falling back to the default cone.
    #[must_use]
    pub fn cone_width(&self) -> f32 {
        if self.cone_angle > 0.0 {
            self.cone_angle
        } else if self.radius > 0.0 {
            self.radius
        } else {
            DEFAULT_CONE_ANGLE
        }
    }

    /// Mesmerize spells get special pulse and end-of-cast handling.
    #[must_use]
    pub fn is_mesmerize(&self) -> bool {
        matches!(self.kind, SpellKind::Mesmerize)
    }
}

/// Read-only catalog of spell definitions.
#[derive(Clone, Debug, Default)]
pub struct SpellBook {
    spells: HashMap<SpellId, Arc<SpellDefinition>>,
}

impl SpellBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book from definitions. Later duplicates win.
    #[must_use]
    pub fn from_definitions(definitions: impl IntoIterator<Item = SpellDefinition>) -> Self {
        let mut book = Self::new();
        for spell in definitions {
            book.insert(spell);
        }
        book
    }

    /// Adds or replaces a spell, returning the shared handle.
    pub fn insert(&mut self, spell: SpellDefinition) -> Arc<SpellDefinition> {
        let spell = Arc::new(spell);
        self.spells.insert(spell.id, Arc::clone(&spell));
        spell
    }

    /// Looks a spell up.
    #[must_use]
    pub fn get(&self, id: SpellId) -> Option<Arc<SpellDefinition>> {
        self.spells.get(&id).cloned()
    }

    /// Number of spells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spells.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(SpellKind::DirectDamage.is_harmful());
        assert!(SpellKind::Lifedrain { return_permille: 500 }.is_direct_damage());
        assert!(SpellKind::DamageOverTime.is_damage());
        assert!(!SpellKind::DamageOverTime.is_direct_damage());
        assert!(!SpellKind::Heal.is_harmful());
        assert!(SpellKind::PiercingMagic.is_buff());
    }

    #[test]
    fn test_definition_flags() {
        let spell = SpellDefinition {
            radius: 350.0,
            range: 0.0,
            pulse: true,
            frequency: 5000,
            ..SpellDefinition::default()
        };
        assert!(spell.is_instant());
        assert!(spell.is_pulsing());
        assert!(spell.is_point_blank_area());
        assert!(!spell.has_positive_effect());
    }

    #[test]
    fn test_cone_width_fallbacks() {
        let mut spell = SpellDefinition::default();
        assert!((spell.cone_width() - DEFAULT_CONE_ANGLE).abs() < f32::EPSILON);
        spell.radius = 60.0;
        assert!((spell.cone_width() - 60.0).abs() < f32::EPSILON);
        spell.cone_angle = 30.0;
        assert!((spell.cone_width() - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_spell_book_lookup() {
        let book = SpellBook::from_definitions([
            SpellDefinition { id: SpellId(1), name: "Fire Bolt".into(), ..SpellDefinition::default() },
            SpellDefinition { id: SpellId(2), name: "Heal".into(), kind: SpellKind::Heal, ..SpellDefinition::default() },
        ]);
        assert_eq!(book.len(), 2);
        assert_eq!(book.get(SpellId(2)).map(|s| s.kind), Some(SpellKind::Heal));
        assert!(book.get(SpellId(3)).is_none());
    }
}
