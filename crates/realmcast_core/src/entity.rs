//! # Living Entities
//!
//! Players, NPCs and structures share one type, [`Living`].
//!
//! ## Lock Layout
//!
//! ```text
//! Living (Arc-shared, identity is immutable)
//! ├─ state:         RwLock<LivingState>        position, pools, flags, stats
//! ├─ effects:       Mutex<Vec<Arc<ActiveEffect>>>  effects ON this entity
//! └─ concentration: Mutex<Vec<Arc<ActiveEffect>>>  effects this entity maintains
//! ```
//!
//! The three locks are independent. Code that needs more than one takes
//! `state` last and never holds it across a call into another entity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use realmcast_shared::{Tick, Vec3, MAX_PLAYER_LEVEL};
use serde::{Deserialize, Serialize};

use crate::effect::ActiveEffect;
use crate::group::GroupId;
use crate::spell::SpellId;

/// Unique identifier for a living entity.
///
/// Handed out by the registry and never reused. NPC slot indices are a
/// separate, recyclable concept (see `EntityRegistry::add_npc`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structures that only accept some spell categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructureKind {
    /// A keep or relic door.
    Door,
    /// A keep wall or tower section.
    KeepComponent,
}

/// What kind of living this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A connected player character.
    Player,
    /// A non-player character (mob, pet, guard).
    Npc,
    /// A destructible structure.
    Structure(StructureKind),
}

/// Realm (faction). Realm 0 is neutral: the mobs of the world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Realm(pub u8);

impl Realm {
    /// Neutral realm.
    pub const NONE: Self = Self(0);

    /// Returns true for the neutral realm.
    #[inline]
    #[must_use]
    pub const fn is_neutral(self) -> bool {
        self.0 == 0
    }
}

/// Character class. Only matters for the pure-caster damage bonus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CharacterClass {
    #[default]
    Unknown,
    Wizard,
    Theurgist,
    Cabalist,
    Sorcerer,
    Necromancer,
    Eldritch,
    Enchanter,
    Mentalist,
    Animist,
    Valewalker,
    Runemaster,
    Spiritmaster,
    Bonedancer,
    Cleric,
    Druid,
    Healer,
    Minstrel,
    Armsman,
    Warrior,
}

impl CharacterClass {
    /// Pure casters get a flat bonus on spell damage.
    #[must_use]
    pub const fn is_pure_caster(self) -> bool {
        matches!(
            self,
            Self::Wizard
                | Self::Theurgist
                | Self::Cabalist
                | Self::Sorcerer
                | Self::Necromancer
                | Self::Eldritch
                | Self::Enchanter
                | Self::Mentalist
                | Self::Animist
                | Self::Valewalker
                | Self::Runemaster
                | Self::Spiritmaster
                | Self::Bonedancer
        )
    }
}

/// How a pet relates to its owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PetKind {
    /// Any ordinary controlled NPC.
    #[default]
    Standard,
    /// A body animated by a shade-form owner.
    Necromantic,
}

/// Damage types. The index selects the resist slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum DamageType {
    #[default]
    Heat,
    Cold,
    Matter,
    Body,
    Spirit,
    Energy,
    Crush,
    Slash,
    Thrust,
    Natural,
}

impl DamageType {
    /// Number of damage types.
    pub const COUNT: usize = 10;

    /// Resist slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Resist values per damage type, in percent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Resists {
    /// Total primary resist (race + items + buffs).
    pub primary: [i32; DamageType::COUNT],
    /// Share of `primary` granted by items; the only part resist pierce removes.
    pub item_bonus: [i32; DamageType::COUNT],
    /// Secondary resist from spec buffs, applied after primary.
    pub secondary: [i32; DamageType::COUNT],
}

/// Recast timer key: either one spell or a whole shared timer group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    /// A single spell.
    Spell(SpellId),
    /// Every spell sharing the timer group.
    Group(u32),
}

/// Casting-related stats, already including item and buff modifiers.
#[derive(Clone, Debug, PartialEq)]
pub struct CastingStats {
    /// Intelligence (NPCs and pets).
    pub intelligence: i32,
    /// The class casting stat (int, piety, empathy...). 0 when the class has none.
    pub mana_stat: i32,
    /// Trained specialization in the cast line.
    pub base_spec: i32,
    /// Specialization including item bonuses.
    pub modified_spec: i32,
    /// Flat to-hit bonus.
    pub to_hit_bonus: i32,
    /// Bonus spell levels.
    pub spell_level_bonus: i32,
    /// Spell range in percent (100 = unmodified).
    pub spell_range_pct: i32,
    /// Bonus spell duration in percent.
    pub spell_duration_pct: i32,
    /// Bonus spell damage in percent.
    pub spell_damage_pct: i32,
    /// Spell critical chance in percent.
    pub crit_chance: i32,
    /// Overall caster effectiveness (1.0 = normal).
    pub effectiveness: f64,
    /// Realm-relic damage bonus (0.1 = +10%).
    pub relic_bonus: f64,
    /// Resist pierce in percent.
    pub resist_pierce: i32,
    /// Focus bonus reducing power cost (0.0-0.4 used).
    pub focus_bonus: f64,
    /// Resists of this entity when it is the target.
    pub resists: Resists,
}

impl Default for CastingStats {
    fn default() -> Self {
        Self {
            intelligence: 0,
            mana_stat: 0,
            base_spec: 1,
            modified_spec: 1,
            to_hit_bonus: 0,
            spell_level_bonus: 0,
            spell_range_pct: 100,
            spell_duration_pct: 0,
            spell_damage_pct: 0,
            crit_chance: 0,
            effectiveness: 1.0,
            relic_bonus: 0.0,
            resist_pierce: 0,
            focus_bonus: 0.0,
            resists: Resists::default(),
        }
    }
}

/// Mutable state of a living entity.
#[derive(Clone, Debug)]
pub struct LivingState {
    /// Alive (health above zero).
    pub alive: bool,
    /// Present in the world (not linkdead, not zoning).
    pub active: bool,
    /// World position.
    pub position: Vec3,
    /// Facing, radians counter-clockwise from +X.
    pub heading: f32,
    /// Faction.
    pub realm: Realm,
    /// Level.
    pub level: u8,
    /// Level cap for spell-level bonuses.
    pub max_level: u8,
    /// Class.
    pub class: CharacterClass,
    /// Current health.
    pub health: i32,
    /// Maximum health.
    pub max_health: i32,
    /// Current mana.
    pub mana: i32,
    /// Maximum mana.
    pub max_mana: i32,
    /// Current endurance.
    pub endurance: i32,
    /// Maximum endurance.
    pub max_endurance: i32,
    /// Unspent concentration points.
    pub concentration: i32,
    /// Maximum concentration points.
    pub max_concentration: i32,
    /// Currently selected target.
    pub target: Option<EntityId>,
    /// Ground target for area spells.
    pub ground_target: Option<Vec3>,
    /// Controlling owner, for pets.
    pub owner: Option<EntityId>,
    /// Controlled pet, for owners.
    pub pet: Option<EntityId>,
    /// Sub-pets commanded by this pet.
    pub sub_pets: Vec<EntityId>,
    /// Kind of pet this is (only meaningful with an owner).
    pub pet_kind: PetKind,
    /// Target suggested by the controlling AI brain.
    pub suggested_target: Option<EntityId>,
    /// Party membership.
    pub group: Option<GroupId>,
    /// Currently moving.
    pub moving: bool,
    /// Currently strafing.
    pub strafing: bool,
    /// Sitting.
    pub sitting: bool,
    /// Silenced.
    pub silenced: bool,
    /// Mesmerized.
    pub mezzed: bool,
    /// Stunned.
    pub stunned: bool,
    /// Refuses beneficial spells from others.
    pub no_help: bool,
    /// Casts cannot be interrupted by attacks.
    pub uninterruptible: bool,
    /// Next cast ignores attack interrupts.
    pub quick_cast: bool,
    /// May move while casting.
    pub move_cast: bool,
    /// Holding an instrument.
    pub has_instrument: bool,
    /// Immune to all damage.
    pub damage_immune: bool,
    /// In shade form; the pet is the body.
    pub shade: bool,
    /// This entity cannot see the given entity (selective blindness).
    pub blinded_to: Option<EntityId>,
    /// Tick of the last interrupting action (0 = none).
    pub interrupt_action: Tick,
    /// No casting before this tick.
    pub interrupt_until: Tick,
    /// Entities currently attacking this one.
    pub attackers: u32,
    /// Last tick attacked by a non-player.
    pub last_attacked_pve: Tick,
    /// Last tick attacked by a player.
    pub last_attacked_pvp: Tick,
    /// Queue the next spell instead of refusing it.
    pub spell_queue: bool,
    /// Piercing-magic to-hit bonus from active effects.
    pub piercing_magic: i32,
    /// Majestic-will effectiveness (0 = inactive).
    pub majestic_will: f64,
    /// Active recast timers, expiring at the given tick.
    pub cooldowns: HashMap<CooldownKey, Tick>,
    /// Casting stats.
    pub stats: CastingStats,
}

impl Default for LivingState {
    fn default() -> Self {
        Self {
            alive: true,
            active: true,
            position: Vec3::ZERO,
            heading: 0.0,
            realm: Realm::NONE,
            level: 1,
            max_level: MAX_PLAYER_LEVEL,
            class: CharacterClass::Unknown,
            health: 100,
            max_health: 100,
            mana: 100,
            max_mana: 100,
            endurance: 100,
            max_endurance: 100,
            concentration: 0,
            max_concentration: 0,
            target: None,
            ground_target: None,
            owner: None,
            pet: None,
            sub_pets: Vec::new(),
            pet_kind: PetKind::Standard,
            suggested_target: None,
            group: None,
            moving: false,
            strafing: false,
            sitting: false,
            silenced: false,
            mezzed: false,
            stunned: false,
            no_help: false,
            uninterruptible: false,
            quick_cast: false,
            move_cast: false,
            has_instrument: false,
            damage_immune: false,
            shade: false,
            blinded_to: None,
            interrupt_action: 0,
            interrupt_until: 0,
            attackers: 0,
            last_attacked_pve: 0,
            last_attacked_pvp: 0,
            spell_queue: false,
            piercing_magic: 0,
            majestic_will: 0.0,
            cooldowns: HashMap::new(),
            stats: CastingStats::default(),
        }
    }
}

impl LivingState {
    /// Returns true if the recast timer for `spell` (or its group) is still running.
    #[must_use]
    pub fn is_on_cooldown(&self, spell: SpellId, group: u32, now: Tick) -> bool {
        let running = |key| self.cooldowns.get(&key).is_some_and(|&until| until > now);
        running(CooldownKey::Spell(spell)) || (group != 0 && running(CooldownKey::Group(group)))
    }

    /// True while an interrupt lockout is active.
    #[inline]
    #[must_use]
    pub const fn is_interrupt_locked(&self, now: Tick) -> bool {
        self.interrupt_action > 0 && self.interrupt_until > now
    }

    /// Applies signed damage (negative heals), clamping to the pool.
    ///
    /// Returns true if this hit killed the entity.
    pub fn apply_health_delta(&mut self, delta: i32) -> bool {
        if !self.alive {
            return false;
        }
        self.health = (self.health - delta).clamp(0, self.max_health);
        if self.health == 0 {
            self.alive = false;
            return true;
        }
        false
    }
}

const NO_SLOT: usize = usize::MAX;

/// A living entity: identity plus independently locked state.
pub struct Living {
    id: EntityId,
    kind: EntityKind,
    name: String,
    npc_slot: AtomicUsize,
    state: RwLock<LivingState>,
    effects: Mutex<Vec<Arc<ActiveEffect>>>,
    concentration: Mutex<Vec<Arc<ActiveEffect>>>,
}

impl Living {
    /// Creates a new living entity.
    #[must_use]
    pub fn new(id: EntityId, kind: EntityKind, name: impl Into<String>, state: LivingState) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            npc_slot: AtomicUsize::new(NO_SLOT),
            state: RwLock::new(state),
            effects: Mutex::new(Vec::new()),
            concentration: Mutex::new(Vec::new()),
        }
    }

    /// Unique id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Entity kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Is this a player?
    #[inline]
    #[must_use]
    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::Player
    }

    /// Is this an NPC (including pets)?
    #[inline]
    #[must_use]
    pub fn is_npc(&self) -> bool {
        self.kind == EntityKind::Npc
    }

    /// Structure kind, if this is a structure.
    #[inline]
    #[must_use]
    pub fn structure(&self) -> Option<StructureKind> {
        match self.kind {
            EntityKind::Structure(kind) => Some(kind),
            _ => None,
        }
    }

    /// Current NPC slot, if registered as an NPC.
    #[must_use]
    pub fn npc_slot(&self) -> Option<usize> {
        match self.npc_slot.load(Ordering::Acquire) {
            NO_SLOT => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn set_npc_slot(&self, slot: Option<usize>) {
        self.npc_slot.store(slot.unwrap_or(NO_SLOT), Ordering::Release);
    }

    /// Read access to the mutable state.
    #[inline]
    pub fn state(&self) -> RwLockReadGuard<'_, LivingState> {
        self.state.read()
    }

    /// Write access to the mutable state.
    #[inline]
    pub fn state_mut(&self) -> RwLockWriteGuard<'_, LivingState> {
        self.state.write()
    }

    /// Locked access to the effects on this entity.
    #[inline]
    pub fn effects(&self) -> MutexGuard<'_, Vec<Arc<ActiveEffect>>> {
        self.effects.lock()
    }

    /// Copy of the effects on this entity (lock released on return).
    #[must_use]
    pub fn effects_snapshot(&self) -> Vec<Arc<ActiveEffect>> {
        self.effects.lock().clone()
    }

    /// Locked access to the concentration and pulse effects this entity maintains.
    #[inline]
    pub fn concentration(&self) -> MutexGuard<'_, Vec<Arc<ActiveEffect>>> {
        self.concentration.lock()
    }

    /// Shorthand: alive?
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.read().alive
    }

    /// Shorthand: active in world?
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    /// Shorthand: position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.state.read().position
    }

    /// Shorthand: realm.
    #[must_use]
    pub fn realm(&self) -> Realm {
        self.state.read().realm
    }

    /// Shorthand: level.
    #[must_use]
    pub fn level(&self) -> u8 {
        self.state.read().level
    }

    /// Shorthand: controlling owner (pets only).
    #[must_use]
    pub fn owner(&self) -> Option<EntityId> {
        self.state.read().owner
    }

    /// Distance to another living.
    #[must_use]
    pub fn distance_to(&self, other: &Living) -> f32 {
        self.position().distance(other.position())
    }
}

impl std::fmt::Debug for Living {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Living")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("npc_slot", &self.npc_slot())
            .finish_non_exhaustive()
    }
}
