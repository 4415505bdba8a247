//! # REALMCAST Shared
//!
//! Common types used by every REALMCAST crate.
//!
//! ## CRITICAL RULE
//!
//! This crate holds plain data only:
//! - geometry (`Vec3`, facing and cone tests)
//! - game-rule constants that never change at runtime
//!
//! Anything with locks or state belongs in `realmcast_core`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;

pub use constants::{
    Tick, BASE_TO_HIT, CAST_ENDURANCE_COST, DAMAGE_CAP_MULTIPLIER, DEFAULT_CONE_ANGLE,
    ENEMY_VIEW_ANGLE, HIT_CHANCE_DAMAGE_THRESHOLD, LEVEL_MOD_FACTOR, MAX_CRIT_CHANCE,
    MAX_DURATION_FACTOR, MAX_PLAYER_LEVEL, MAX_SECONDARY_RESIST, MIN_SPELL_RANGE, MIN_VARIANCE,
    MIN_VARIANCE_CEILING, PURE_CASTER_BONUS, TICKS_PER_SECOND,
};
pub use math::Vec3;
