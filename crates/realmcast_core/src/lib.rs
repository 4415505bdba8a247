//! # REALMCAST Core
//!
//! The data every other subsystem depends on:
//! - living entities with an explicit lock layout
//! - read-only spell definitions
//! - active effect records shared between owner, caster and registry
//! - the concurrent [`EntityRegistry`]
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not references** - entities point at each other by [`EntityId`]
//! 2. **Snapshots for readers** - scans copy `Arc`s out and release the lock
//! 3. **Nothing here fails** - absent ids are no-ops or empty results
//!
//! ## Example
//!
//! ```rust,ignore
//! use realmcast_core::{EntityKind, EntityRegistry, LivingState};
//!
//! let registry = EntityRegistry::new(10_000);
//! let wolf = registry.create(EntityKind::Npc, "wolf", LivingState::default());
//! let slot = registry.add_npc(wolf);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod effect;
pub mod entity;
pub mod group;
pub mod registry;
pub mod spell;

pub use effect::{ActiveEffect, EffectId, EffectSnapshot, EffectTiming};
pub use entity::{
    CastingStats, CharacterClass, CooldownKey, DamageType, EntityId, EntityKind, Living, LivingState,
    PetKind, Realm, Resists, StructureKind,
};
pub use group::{GroupId, Groups};
pub use registry::{EntityRegistry, RegistryStats};
pub use spell::{SpellBook, SpellDefinition, SpellId, SpellKind, SpellLine, TargetMode};
