//! # REALMCAST Spells
//!
//! The casting pipeline on top of [`realmcast_core`].
//!
//! ## Flow
//!
//! ```text
//! begin_cast ──> CastSlots ──advance_all──> CastSession ──Finished──> start_spell
//!                                                                      │
//!              TargetSelector ──> CombatResolver ──> EffectScheduler <─┘
//!                                                          │
//!                                         registry effects + SpellEvent
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Explicit context** - every operation takes a [`World`], nothing global
//! 2. **Seeded randomness** - all rolls go through one [`RandomSource`]
//! 3. **Ordered side effects** - rolls and mutations run in `EntityId` order,
//!    only read-only snapshots fan out to worker threads
//!
//! ## Example
//!
//! ```rust,ignore
//! use realmcast_spells::{SpellConfig, World};
//!
//! let world = World::builder().config(SpellConfig::load("config/spells.toml")?).build();
//! let mage = world.spawn_player("mage", LivingState::default());
//! world.casts().begin_cast(&world, &mage, bolt, Some(goblin.id()), now)?;
//! world.casts().advance_all(&world, now);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod events;
pub mod resolver;
pub mod rng;
pub mod scheduler;
pub mod session;
pub mod targeting;
pub mod world;

pub use config::{load_spell_book, parse_spell_book, SpellConfig};
pub use error::{SpellError, SpellResult};
pub use events::{CancelReason, EventBus, EventReceiver, EventSender, Notifier, NullNotifier, SpellEvent};
pub use resolver::{CombatResolver, Combatant, DamageOutcome};
pub use rng::{Dice, RandomDeck, RandomSource, ScriptedRandom};
pub use scheduler::{ApplyOutcome, ApplyRejection, EffectScheduler, EffectSweep};
pub use session::{
    start_spell, Admission, CastRejection, CastReport, CastSession, CastSlots, CastStages, CastState, Casting,
    TargetOutcome, TargetResult,
};
pub use targeting::{Hostility, LineOfSight, OpenField, RealmHostility, RegistryScan, SpatialIndex, TargetSelector};
pub use world::{AttackNotice, World, WorldBuilder};
