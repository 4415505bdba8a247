//! End-to-end casting through the simulation driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use realmcast::core::{
    EntityId, EntityRegistry, Living, LivingState, Realm, SpellBook, SpellDefinition, SpellId, SpellKind, TargetMode,
};
use realmcast::shared::Vec3;
use realmcast::spells::{
    Admission, ApplyOutcome, ApplyRejection, CancelReason, CastRejection, CastState, RandomSource, RegistryScan,
    ScriptedRandom, SpatialIndex, SpellConfig, SpellError, SpellEvent, TargetResult, World, WorldBuilder,
};
use realmcast::{Command, SimError, Simulation, SimulationConfig};

// =============================================================================
// Fixtures
// =============================================================================

const BOLT: SpellId = SpellId(101);
const CHANNELED_BOLT: SpellId = SpellId(102);
const FIREBALL: SpellId = SpellId(103);
const BURN: SpellId = SpellId(104);
const GAZE: SpellId = SpellId(105);
const AURA_A: SpellId = SpellId(201);
const AURA_B: SpellId = SpellId(202);
const AURA_C: SpellId = SpellId(203);

fn catalog() -> Vec<SpellDefinition> {
    let bolt = SpellDefinition {
        id: BOLT,
        name: "Bolt".into(),
        level: 50,
        damage: 40.0,
        power: 10,
        ..SpellDefinition::default()
    };
    let aura = |id: SpellId, group: u32| SpellDefinition {
        id,
        name: format!("Aura {}", id.0),
        kind: SpellKind::Buff,
        target: TargetMode::SelfOnly,
        range: 0.0,
        concentration: 10,
        value: 5.0,
        effect_group: group,
        ..SpellDefinition::default()
    };
    vec![
        bolt.clone(),
        SpellDefinition { id: CHANNELED_BOLT, name: "Slow Bolt".into(), cast_time: 3_000, ..bolt.clone() },
        SpellDefinition {
            id: BURN,
            name: "Burn".into(),
            kind: SpellKind::DamageOverTime,
            damage: 10.0,
            duration: 8_000,
            frequency: 4_000,
            ..bolt.clone()
        },
        SpellDefinition {
            id: GAZE,
            name: "Gaze".into(),
            kind: SpellKind::Debuff,
            focus: true,
            damage: 0.0,
            value: 5.0,
            cast_time: 1_000,
            duration: 60_000,
            ..bolt.clone()
        },
        SpellDefinition { id: FIREBALL, name: "Fireball".into(), target: TargetMode::Area, radius: 300.0, ..bolt },
        aura(AURA_A, 11),
        aura(AURA_B, 12),
        aura(AURA_C, 13),
    ]
}

fn builder() -> WorldBuilder {
    World::builder().spells(SpellBook::from_definitions(catalog())).rng(ScriptedRandom::constant(99))
}

fn simulation(spells: SpellConfig) -> Simulation {
    let config = SimulationConfig { tick_step: 100, spells, ..SimulationConfig::default() };
    Simulation::with_builder(config, builder()).unwrap()
}

fn mage() -> LivingState {
    LivingState {
        realm: Realm(1),
        level: 50,
        mana: 500,
        max_mana: 500,
        concentration: 100,
        max_concentration: 100,
        ..LivingState::default()
    }
}

fn foe_at(position: Vec3) -> LivingState {
    LivingState { position, realm: Realm(2), level: 50, health: 1_000, max_health: 1_000, ..LivingState::default() }
}

fn cast(sim: &Simulation, caster: EntityId, spell: SpellId, target: Option<EntityId>) {
    sim.sender().send(Command::BeginCast { caster, spell, target }).unwrap();
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_instant_resolves_in_one_tick() {
    let mut sim = simulation(SpellConfig::default());
    let caster = sim.world().spawn_player("Mage", mage());
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), BOLT, Some(foe.id()));
    let report = sim.tick();

    assert_eq!(report.admitted, vec![(caster.id(), Admission::Started)]);
    assert_eq!(report.casts.len(), 1);
    let done = &report.casts[0];
    assert_eq!(done.trail, vec![CastState::Precast, CastState::Finished, CastState::Cleanup]);
    assert_eq!(done.outcomes.len(), 1);
    assert_eq!(done.outcomes[0].target, foe.id());
    assert!(matches!(done.outcomes[0].result, TargetResult::Applied(ApplyOutcome::Damage(_))));
    assert!(foe.state().health < 1_000);
    assert!(!sim.world().casts().is_casting(caster.id()));

    let events = sim.events().drain();
    assert_eq!(events.iter().filter(|e| matches!(e, SpellEvent::Damage { .. })).count(), 1);
}

#[test]
fn test_attack_in_first_half_interrupts_channeled_cast() {
    let mut sim = simulation(SpellConfig::default());
    let caster = sim.world().spawn_player("Mage", mage());
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), CHANNELED_BOLT, Some(foe.id()));
    sim.tick();
    assert_eq!(sim.world().casts().current_state(caster.id()), Some(CastState::Casting));

    sim.run_for(5);
    sim.sender().send(Command::CasterAttacked { caster: caster.id(), attacker: foe.id() }).unwrap();
    sim.tick();

    assert!(!sim.world().casts().is_casting(caster.id()));
    let events = sim.events().drain();
    assert!(events.iter().any(|e| matches!(e, SpellEvent::CastInterrupted { spell, .. } if *spell == CHANNELED_BOLT)));
    assert!(!events.iter().any(|e| matches!(e, SpellEvent::CastFinished { .. })));

    // Well past the cast time: nothing lands.
    let reports = sim.run_for(40);
    assert!(reports.iter().all(|r| r.casts.is_empty()));
    assert_eq!(foe.state().health, 1_000);
}

#[test]
fn test_attack_in_second_half_does_not_interrupt() {
    let mut sim = simulation(SpellConfig::default());
    let caster = sim.world().spawn_player("Mage", mage());
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), CHANNELED_BOLT, Some(foe.id()));
    sim.run_for(20);
    sim.sender().send(Command::CasterAttacked { caster: caster.id(), attacker: foe.id() }).unwrap();
    sim.tick();
    assert_eq!(sim.world().casts().current_state(caster.id()), Some(CastState::Casting));

    let finished: Vec<_> = sim.run_for(15).into_iter().flat_map(|r| r.casts).collect();
    assert_eq!(finished.len(), 1);
    assert!(finished[0].finished());
    assert!(foe.state().health < 1_000);
}

/// Reports every player twice, as two overlapping index cells would.
struct OverlappingCells;

impl SpatialIndex for OverlappingCells {
    fn players_near(&self, registry: &EntityRegistry, center: Vec3, radius: f32) -> Vec<Arc<Living>> {
        let mut found = RegistryScan.players_near(registry, center, radius);
        found.extend(RegistryScan.players_near(registry, center, radius));
        found
    }

    fn npcs_near(&self, registry: &EntityRegistry, center: Vec3, radius: f32) -> Vec<Arc<Living>> {
        RegistryScan.npcs_near(registry, center, radius)
    }
}

#[test]
fn test_area_hits_each_hostile_in_radius_once() {
    let config = SimulationConfig { tick_step: 100, ..SimulationConfig::default() };
    let mut sim = Simulation::with_builder(config, builder().spatial(OverlappingCells)).unwrap();
    let ground = Vec3::new(1_000.0, 0.0, 0.0);
    let world = sim.world();

    let caster = world.spawn_player("Mage", LivingState { ground_target: Some(ground), ..mage() });
    let near = world.spawn_player("Near", foe_at(Vec3::new(1_100.0, 0.0, 0.0)));
    let edge = world.spawn_player("Edge", foe_at(Vec3::new(1_000.0, 300.0, 0.0)));
    let beast = world.spawn_npc("Beast", foe_at(Vec3::new(900.0, 0.0, 0.0)));
    let _outside = world.spawn_player("Outside", foe_at(Vec3::new(1_301.0, 0.0, 0.0)));
    let _ally = world.spawn_player("Ally", LivingState { position: ground, ..mage() });

    let spell = world.spells().get(FIREBALL).unwrap();
    let mut selected: Vec<_> = world.targets().select(&caster, &spell, None).iter().map(|l| l.id()).collect();
    let mut expected = vec![near.id(), edge.id(), beast.id()];
    expected.sort_unstable();
    assert_eq!(selected, expected);

    cast(&sim, caster.id(), FIREBALL, None);
    let report = sim.tick();
    assert_eq!(report.casts.len(), 1);
    let outcomes = &report.casts[0].outcomes;
    selected = outcomes.iter().map(|o| o.target).collect();
    assert_eq!(selected, expected);

    // Full falloff on the rim: the edge target is inside but takes nothing.
    let on_edge = outcomes.iter().find(|o| o.target == edge.id()).unwrap();
    assert!(matches!(on_edge.result, TargetResult::Applied(ApplyOutcome::Rejected(ApplyRejection::Ineffective))));
    assert_eq!(edge.state().health, 1_000);
    assert!(near.state().health < 1_000);
    assert!(beast.state().health < 1_000);
}

#[test]
fn test_concentration_cap_refuses_without_session() {
    let mut sim = simulation(SpellConfig { max_concentration_effects: 2, ..SpellConfig::default() });
    let caster = sim.world().spawn_player("Mage", mage());

    cast(&sim, caster.id(), AURA_A, None);
    sim.tick();
    assert_eq!(caster.concentration().len(), 1);

    // One below the cap: one more fits.
    cast(&sim, caster.id(), AURA_B, None);
    let report = sim.tick();
    assert_eq!(report.admitted, vec![(caster.id(), Admission::Started)]);
    assert_eq!(caster.concentration().len(), 2);
    assert_eq!(caster.state().concentration, 80);
    sim.events().drain();

    cast(&sim, caster.id(), AURA_C, None);
    let report = sim.tick();
    assert_eq!(report.rejected, vec![(caster.id(), CastRejection::ConcentrationFull { max: 2 })]);
    assert!(report.casts.is_empty());
    assert!(sim.world().casts().instant_spell(caster.id()).is_none());
    assert!(sim.world().casts().current_state(caster.id()).is_none());
    assert_eq!(caster.concentration().len(), 2);
    assert!(sim.events().drain().iter().any(|e| matches!(e, SpellEvent::CastRejected { spell, .. } if *spell == AURA_C)));
}

#[test]
fn test_resist_is_complement_of_to_hit() {
    let world = World::builder().rng(ScriptedRandom::constant(99).with_resist_rolls(&[11, 12])).build();
    let caster = world.spawn_player("Mage", mage());
    let foe = world.spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));
    let (me, them) = (world.combatant(&caster), world.combatant(&foe));
    let resolver = world.resolver();

    let even = SpellDefinition { level: 50, ..SpellDefinition::default() };
    assert_eq!(resolver.to_hit_chance(&me, &them, &even), 88);
    assert_eq!(resolver.resist_chance(&me, &them, &even), 12);
    assert!(resolver.roll_resist(&me, &them, &even));
    assert!(!resolver.roll_resist(&me, &them, &even));

    let low = SpellDefinition { level: 1, ..SpellDefinition::default() };
    let hit = resolver.to_hit_chance(&me, &them, &low);
    assert_eq!(hit, 64);
    assert_eq!(resolver.resist_chance(&me, &them, &low), 100 - hit);
}

// =============================================================================
// Slots
// =============================================================================

#[test]
fn test_queued_spell_follows_running_cast() {
    let mut sim = simulation(SpellConfig::default());
    let caster = sim.world().spawn_player("Mage", LivingState { spell_queue: true, ..mage() });
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), CHANNELED_BOLT, Some(foe.id()));
    sim.tick();
    cast(&sim, caster.id(), CHANNELED_BOLT, Some(foe.id()));
    let report = sim.tick();
    assert_eq!(report.admitted, vec![(caster.id(), Admission::Queued)]);
    assert_eq!(sim.world().casts().queued_spell(caster.id()), Some(CHANNELED_BOLT));

    let finished: usize = sim.run_for(70).iter().map(|r| r.casts.iter().filter(|c| c.finished()).count()).sum();
    assert_eq!(finished, 2);
    assert!(sim.world().casts().queued_spell(caster.id()).is_none());
}

#[test]
fn test_moving_interrupts_channeled_cast() {
    let mut sim = simulation(SpellConfig::default());
    let caster = sim.world().spawn_player("Mage", mage());
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), CHANNELED_BOLT, Some(foe.id()));
    sim.tick();
    sim.sender().send(Command::CasterMoved { caster: caster.id() }).unwrap();
    sim.tick();

    assert!(!sim.world().casts().is_casting(caster.id()));
    assert_eq!(foe.state().health, 1_000);
}

// =============================================================================
// Faults and forced cancels
// =============================================================================

/// Scripted rolls that panic once armed, standing in for a broken collaborator.
struct Tripwire {
    rolls: ScriptedRandom,
    armed: Arc<AtomicBool>,
}

impl Tripwire {
    fn check(&self) {
        if self.armed.load(Ordering::SeqCst) {
            panic!("random source unavailable");
        }
    }
}

impl RandomSource for Tripwire {
    fn resist_roll(&self, caster: EntityId, caster_is_player: bool) -> i32 {
        self.check();
        self.rolls.resist_roll(caster, caster_is_player)
    }

    fn int_inclusive(&self, min: i32, max: i32) -> i32 {
        self.check();
        self.rolls.int_inclusive(min, max)
    }

    fn uniform(&self, min: f64, max: f64) -> f64 {
        self.check();
        self.rolls.uniform(min, max)
    }
}

fn tripwired() -> (Simulation, Arc<AtomicBool>) {
    let armed = Arc::new(AtomicBool::new(false));
    let rng = Tripwire { rolls: ScriptedRandom::constant(99), armed: Arc::clone(&armed) };
    let builder = World::builder().spells(SpellBook::from_definitions(catalog())).rng(rng);
    let config = SimulationConfig { tick_step: 100, ..SimulationConfig::default() };
    (Simulation::with_builder(config, builder).unwrap(), armed)
}

#[test]
fn test_faulting_effect_does_not_stop_the_clock() {
    let (mut sim, armed) = tripwired();
    let caster = sim.world().spawn_player("Mage", mage());
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), BURN, Some(foe.id()));
    sim.tick();
    assert_eq!(foe.effects_snapshot().len(), 1);
    sim.events().drain();

    armed.store(true, Ordering::SeqCst);
    let reports = sim.run_for(40);
    assert_eq!(reports.last().map(|r| r.tick), Some(4_100));
    let errors: Vec<_> = reports.iter().flat_map(|r| r.errors.iter()).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], SimError::Spells(SpellError::EffectFault { spell, .. }) if *spell == BURN));
    assert_eq!(reports.iter().map(|r| r.faults()).sum::<usize>(), 1);

    assert!(foe.effects_snapshot().is_empty());
    assert!(sim.world().registry().effects().is_empty());
    assert_eq!(foe.state().health, 1_000);
    assert!(sim.events().drain().iter().any(|e| matches!(
        e,
        SpellEvent::EffectRemoved { spell, reason: CancelReason::Fault, .. } if *spell == BURN
    )));
    assert!(sim.tick().errors.is_empty());
}

#[test]
fn test_faulting_command_is_dropped_and_cast_continues() {
    let (mut sim, armed) = tripwired();
    let caster = sim.world().spawn_player("Mage", mage());
    let foe = sim.world().spawn_player("Foe", foe_at(Vec3::new(200.0, 0.0, 0.0)));

    cast(&sim, caster.id(), CHANNELED_BOLT, Some(foe.id()));
    sim.tick();
    armed.store(true, Ordering::SeqCst);
    sim.sender().send(Command::CasterAttacked { caster: caster.id(), attacker: foe.id() }).unwrap();
    let report = sim.tick();

    assert_eq!(report.commands, 1);
    assert!(matches!(report.errors.as_slice(), [SimError::CommandFault { .. }]));
    assert_eq!(report.faults(), 1);
    assert_eq!(sim.world().casts().current_state(caster.id()), Some(CastState::Casting));

    armed.store(false, Ordering::SeqCst);
    let finished: Vec<_> = sim.run_for(35).into_iter().flat_map(|r| r.casts).collect();
    assert_eq!(finished.len(), 1);
    assert!(finished[0].finished());
    assert!(foe.state().health < 1_000);
}

#[test]
fn test_death_ends_held_focus() {
    let mut sim = simulation(SpellConfig::default());
    let caster = sim.world().spawn_player("Mage", LivingState { health: 1, ..mage() });
    let foe = sim.world().spawn_player(
        "Foe",
        LivingState {
            mana: 500,
            max_mana: 500,
            heading: std::f32::consts::PI,
            ..foe_at(Vec3::new(200.0, 0.0, 0.0))
        },
    );

    cast(&sim, caster.id(), GAZE, Some(foe.id()));
    sim.run_for(11);
    assert_eq!(sim.world().casts().current_state(caster.id()), Some(CastState::Focusing));
    assert_eq!(foe.effects_snapshot().len(), 1);

    cast(&sim, foe.id(), BOLT, Some(caster.id()));
    sim.tick();
    assert!(!caster.is_alive());
    assert!(foe.effects_snapshot().is_empty());

    let report = sim.tick();
    assert!(report.casts.iter().any(|c| c.caster == caster.id() && c.spell == Some(GAZE)));
    assert!(sim.world().casts().current_state(caster.id()).is_none());
    assert!(sim.world().registry().effects().iter().all(|e| e.caster() != caster.id()));
    assert!(sim.events().drain().iter().any(|e| matches!(e, SpellEvent::FocusLost { spell, .. } if *spell == GAZE)));
}
