//! # Game-Rule Constants
//!
//! Fixed numbers of the combat rules.
//!
//! **CRITICAL:** Tunables that operators may change live in `SpellConfig`
//! (`realmcast_spells::config`). Only values that are part of the rules
//! themselves belong here.

// =============================================================================
// TIME
// =============================================================================

/// Clock tick. One tick is one millisecond of game-loop time.
pub type Tick = u64;

/// Ticks per second.
pub const TICKS_PER_SECOND: Tick = 1000;

// =============================================================================
// HIT & DAMAGE
// =============================================================================

/// Base spell to-hit chance in percent.
pub const BASE_TO_HIT: i32 = 88;

/// Below this to-hit chance, damage is scaled down.
pub const HIT_CHANCE_DAMAGE_THRESHOLD: i32 = 55;

/// Level-difference factor applied to damage variance.
pub const LEVEL_MOD_FACTOR: f64 = 0.02;

/// Critical-hit chance never exceeds this percentage.
pub const MAX_CRIT_CHANCE: i32 = 50;

/// Secondary (spec buff) resist cap in percent.
pub const MAX_SECONDARY_RESIST: i32 = 80;

/// Damage is capped at this multiple of the spell's damage.
pub const DAMAGE_CAP_MULTIPLIER: f64 = 3.0;

/// Lowest variance floor any spell may roll with.
pub const MIN_VARIANCE: f64 = 0.2;

/// Variance ceiling never drops below this.
pub const MIN_VARIANCE_CEILING: f64 = 0.25;

/// Bonus multiplier for pure caster classes.
pub const PURE_CASTER_BONUS: f64 = 1.10;

// =============================================================================
// GEOMETRY
// =============================================================================

/// Shortest range any ranged spell can have.
pub const MIN_SPELL_RANGE: f32 = 32.0;

/// Enemy targets must lie inside this frontal arc (degrees).
pub const ENEMY_VIEW_ANGLE: f32 = 180.0;

/// Cone spells without a radius use this arc (degrees).
pub const DEFAULT_CONE_ANGLE: f32 = 100.0;

// =============================================================================
// CHARACTERS
// =============================================================================

/// Maximum player level.
pub const MAX_PLAYER_LEVEL: u8 = 50;

/// Endurance paid by a player for each finished non-pulsing cast.
pub const CAST_ENDURANCE_COST: i32 = 5;

/// Effect duration never exceeds this multiple of the spell duration.
pub const MAX_DURATION_FACTOR: f64 = 4.0;
