//! # REALMCAST
//!
//! Spell casting and effect resolution for a realm-versus-realm world.
//!
//! ## Crate Layout
//!
//! ```text
//! realmcast_shared   constants, ticks, geometry
//! realmcast_core     entities, spells, effects, EntityRegistry
//! realmcast_spells   CombatResolver, TargetSelector, CastSession, EffectScheduler
//! realmcast          Simulation: clock, command queue, event bus
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use realmcast::{Command, Simulation, SimulationConfig};
//!
//! let mut sim = Simulation::load("config/realmcast.toml".as_ref())?;
//! let mage = sim.world().spawn_player("Mage", LivingState::default());
//! sim.sender().send(Command::BeginCast { caster: mage.id(), spell: SpellId(101), target: None })?;
//! let report = sim.tick();
//! for event in sim.events().drain() {
//!     // forward to clients
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod simulation;

pub use realmcast_core as core;
pub use realmcast_shared as shared;
pub use realmcast_spells as spells;

pub use clock::{GameClock, TickPacer, TickStats};
pub use commands::{Command, CommandSender};
pub use config::SimulationConfig;
pub use error::{SimError, SimResult};
pub use simulation::{Simulation, TickReport};
