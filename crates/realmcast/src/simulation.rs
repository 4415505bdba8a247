//! # Simulation Driver
//!
//! Owns the [`World`] and steps it on a fixed game clock.
//!
//! ```text
//! ┌──────────── one step ─────────────┐
//! │ clock += tick_step                │
//! │ apply queued commands (FIFO)      │
//! │   a panicking command is dropped  │
//! │ expire and pulse effects          │
//! │ advance every cast session        │
//! │ record timing                     │
//! └───────────────────────────────────┘
//!        │                     ▲
//!   EventReceiver         CommandSender
//! ```
//!
//! Nothing outside a step mutates casts, so everything the world does is a
//! function of the commands and the clock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use realmcast_core::EntityId;
use realmcast_shared::Tick;
use realmcast_spells::error::panic_message;
use realmcast_spells::{
    load_spell_book, Admission, CancelReason, CastRejection, CastReport, EventBus, EventReceiver, World, WorldBuilder,
};

use crate::clock::{GameClock, TickPacer, TickStats};
use crate::commands::{Command, CommandQueue, CommandSender};
use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};

/// What one step did.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// Game tick the step ran at.
    pub tick: Tick,
    /// Commands applied.
    pub commands: usize,
    /// Casts taken this step.
    pub admitted: Vec<(EntityId, Admission)>,
    /// Casts refused this step.
    pub rejected: Vec<(EntityId, CastRejection)>,
    /// Commands that named something unknown, and faults caught in
    /// commands and effects.
    pub errors: Vec<SimError>,
    /// Effects that expired or pulsed.
    pub effects_ticked: usize,
    /// Sessions that left their slot.
    pub casts: Vec<CastReport>,
}

impl TickReport {
    fn new(tick: Tick) -> Self {
        Self { tick, ..Self::default() }
    }

    /// Sessions, effects and commands that faulted and were dropped.
    #[must_use]
    pub fn faults(&self) -> usize {
        let sessions = self.casts.iter().filter(|report| report.fault.is_some()).count();
        sessions + self.errors.iter().filter(|err| err.is_fault()).count()
    }
}

/// The simulation.
pub struct Simulation {
    config: SimulationConfig,
    world: World,
    clock: GameClock,
    commands: CommandQueue,
    events: EventReceiver,
    stats: TickStats,
}

impl Simulation {
    /// Builds a simulation with default collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured spell catalog cannot be loaded.
    pub fn new(config: SimulationConfig) -> SimResult<Self> {
        Self::with_builder(config, World::builder())
    }

    /// Builds a simulation around a partly configured [`WorldBuilder`]
    /// (spatial index, hostility, random source, catalog).
    ///
    /// The builder's notifier and config are replaced: events go to
    /// [`Simulation::events`] and the config comes from `config.spells`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the configured
    /// spell catalog cannot be loaded.
    pub fn with_builder(config: SimulationConfig, builder: WorldBuilder) -> SimResult<Self> {
        config.validate()?;

        let mut builder = builder.config(config.spells.clone()).npc_capacity(config.npc_capacity);
        if let Some(path) = &config.spell_catalog {
            builder = builder.spells(load_spell_book(path)?);
        }

        let (sender, events) = EventBus::create_pair(config.event_capacity);
        let world = builder.notifier(sender).build();

        tracing::info!(
            "simulation ready: step {} ticks, {} command slots, {} event slots",
            config.tick_step,
            config.command_capacity,
            config.event_capacity
        );

        Ok(Self {
            clock: GameClock::new(config.tick_step),
            commands: CommandQueue::new(config.command_capacity),
            events,
            stats: TickStats::default(),
            world,
            config,
        })
    }

    /// Loads the configuration file and builds the simulation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or the catalog it names is unusable.
    pub fn load(path: &Path) -> SimResult<Self> {
        Self::new(SimulationConfig::load(path)?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The world.
    #[inline]
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Current game tick.
    #[inline]
    #[must_use]
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Outbound events.
    #[must_use]
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    /// A handle for queueing commands from any thread.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.commands.sender()
    }

    /// Step timing.
    #[must_use]
    pub fn stats(&self) -> TickStats {
        self.stats
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// Runs one step.
    pub fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let now = self.clock.advance();
        let mut report = TickReport::new(now);

        for command in self.commands.drain() {
            let copy = command.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.apply(command, now, &mut report))) {
                let reason = panic_message(payload.as_ref());
                let fault = SimError::CommandFault { command: format!("{copy:?}"), reason };
                tracing::error!("{}; dropped", fault);
                report.errors.push(fault);
            }
            report.commands += 1;
        }
        let sweep = self.world.scheduler().tick(now);
        report.effects_ticked = sweep.processed;
        report.errors.extend(sweep.faults.into_iter().map(SimError::from));
        report.casts = self.world.casts().advance_all(&self.world, now);

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.stats.record(elapsed_us, self.config.slow_tick_us);
        self.stats.commands += report.commands as u64;
        self.stats.faults += report.faults() as u64;
        if elapsed_us > self.config.slow_tick_us {
            tracing::warn!("slow step at tick {}: {}µs", now, elapsed_us);
        }
        report
    }

    /// Runs `steps` steps back to back.
    pub fn run_for(&mut self, steps: usize) -> Vec<TickReport> {
        (0..steps).map(|_| self.tick()).collect()
    }

    /// Runs `steps` steps paced to real time.
    pub fn run_paced(&mut self, steps: usize) -> Vec<TickReport> {
        let mut pacer = TickPacer::new(self.config.tick_step);
        (0..steps)
            .map(|_| {
                pacer.wait_for_next_tick();
                self.tick()
            })
            .collect()
    }

    fn apply(&self, command: Command, now: Tick, report: &mut TickReport) {
        let world = &self.world;
        match command {
            Command::BeginCast { caster, spell, target } => {
                let Some(living) = world.registry().get(caster) else {
                    tracing::warn!("cast from unknown caster {}", caster);
                    report.errors.push(SimError::UnknownCaster(caster));
                    return;
                };
                let Some(definition) = world.spells().get(spell) else {
                    tracing::warn!("{} casts unknown spell {}", caster, spell);
                    report.errors.push(SimError::UnknownSpell(spell));
                    return;
                };
                match world.casts().begin_cast(world, &living, definition, target, now) {
                    Ok(admission) => report.admitted.push((caster, admission)),
                    Err(rejection) => report.rejected.push((caster, rejection)),
                }
            }
            Command::CasterAttacked { caster, attacker } => {
                world.casts().caster_attacked(world, caster, attacker, now);
            }
            Command::CasterMoved { caster } => {
                world.casts().caster_moves(world, caster);
            }
            Command::CancelEffect { effect } => {
                if !world.scheduler().cancel_by_id(effect, CancelReason::Explicit) {
                    tracing::debug!("effect {:?} already gone", effect);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmcast_core::{LivingState, SpellId};

    #[test]
    fn test_simulation_creation() {
        let sim = Simulation::new(SimulationConfig::default()).unwrap();
        assert_eq!(sim.now(), 0);
        assert_eq!(sim.world().spells().len(), 0);
    }

    #[test]
    fn test_clock_advances_per_step() {
        let mut sim = Simulation::new(SimulationConfig { tick_step: 100, ..SimulationConfig::default() }).unwrap();
        let reports = sim.run_for(3);
        assert_eq!(reports.iter().map(|r| r.tick).collect::<Vec<_>>(), vec![100, 200, 300]);
        assert_eq!(sim.stats().total_ticks, 3);
    }

    #[test]
    fn test_paced_run_follows_wall_clock() {
        let mut sim = Simulation::new(SimulationConfig { tick_step: 20, ..SimulationConfig::default() }).unwrap();
        let started = Instant::now();
        let reports = sim.run_paced(3);
        assert!(started.elapsed() >= std::time::Duration::from_millis(60));
        assert_eq!(reports.last().map(|r| r.tick), Some(60));
    }

    #[test]
    fn test_unknown_caster_and_spell_are_reported() {
        let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
        let mage = sim.world().spawn_player("Mage", LivingState::default());
        let sender = sim.sender();
        sender.send(Command::BeginCast { caster: EntityId(9_999), spell: SpellId(1), target: None }).unwrap();
        sender.send(Command::BeginCast { caster: mage.id(), spell: SpellId(1), target: None }).unwrap();

        let report = sim.tick();
        assert_eq!(report.commands, 2);
        assert_eq!(report.errors, vec![SimError::UnknownCaster(EntityId(9_999)), SimError::UnknownSpell(SpellId(1))]);
        assert!(report.admitted.is_empty());
        assert_eq!(sim.stats().commands, 2);
    }

    #[test]
    fn test_load_shipped_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/realmcast.toml");
        let sim = Simulation::load(&path).unwrap();
        assert_eq!(sim.config().tick_step, 50);
        assert_eq!(sim.world().spells().len(), 8);
        assert!(sim.world().spells().get(SpellId(103)).is_some_and(|s| s.radius == 300.0));
    }

    #[test]
    fn test_invalid_config_refused() {
        let config = SimulationConfig { command_capacity: 0, ..SimulationConfig::default() };
        assert!(Simulation::new(config).is_err());
    }

    #[test]
    fn test_missing_catalog_refused() {
        let config = SimulationConfig {
            spell_catalog: Some("/nonexistent/spells.toml".into()),
            ..SimulationConfig::default()
        };
        assert!(matches!(Simulation::new(config), Err(SimError::Spells(_))));
    }
}
