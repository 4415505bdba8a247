//! Resolution of a finished cast (or a pulse) against its targets.
//!
//! ```text
//! select targets ──> snapshot each target (parallel) ──> per target, by id:
//!                                                         resist roll
//!                                                         ├─ resisted: side effects
//!                                                         └─ landed:   scheduler.apply
//!                └──> sub-spells at the primary target
//! ```
//!
//! Snapshots are independent of each other and may be taken on worker
//! threads. Rolls and state changes run on the calling thread in id order so
//! a seeded fight replays identically.

use std::sync::Arc;

use realmcast_core::{EntityId, Living, SpellDefinition, SpellId, TargetMode};
use realmcast_shared::{Tick, Vec3};

use crate::events::SpellEvent;
use crate::resolver::{spell_range, Combatant};
use crate::scheduler::ApplyOutcome;
use crate::world::World;

/// What a spell did to one entity.
#[derive(Clone, Debug)]
pub enum TargetResult {
    /// The target resisted.
    Resisted,
    /// The spell landed.
    Applied(ApplyOutcome),
}

/// Outcome for one affected entity.
#[derive(Clone, Debug)]
pub struct TargetOutcome {
    /// Affected entity.
    pub target: EntityId,
    /// Spell that hit it (a sub-spell for sub-spell outcomes).
    pub spell: SpellId,
    /// Result.
    pub result: TargetResult,
}

struct Prepared {
    living: Arc<Living>,
    defender: Combatant,
    effectiveness: f64,
}

/// Resolves `spell` from `caster` at `target` and casts its sub-spells.
///
/// Does not charge power; the cast or the pulse pays before calling this.
pub fn start_spell(
    world: &World,
    caster: &Arc<Living>,
    spell: &Arc<SpellDefinition>,
    target: Option<&Arc<Living>>,
    now: Tick,
) -> Vec<TargetOutcome> {
    let mut outcomes = resolve(world, caster, spell, target, now);
    if let Some(primary) = target {
        for sub in spell.sub_spells.iter().filter_map(|id| world.spells().get(*id)) {
            outcomes.extend(resolve(world, caster, &sub, Some(primary), now));
        }
    }
    outcomes
}

fn resolve(
    world: &World,
    caster: &Arc<Living>,
    spell: &Arc<SpellDefinition>,
    target: Option<&Arc<Living>>,
    now: Tick,
) -> Vec<TargetOutcome> {
    let self_buff = spell.target == TargetMode::Realm
        && !spell.is_concentration()
        && spell.kind.is_buff()
        && target.is_some_and(|t| t.id() == caster.id());
    let targets = if self_buff {
        let range = spell_range(spell, caster.state().stats.spell_range_pct);
        world.targets().group_and_pets(caster, range)
    } else {
        world.targets().select(caster, spell, target)
    };
    if targets.is_empty() {
        tracing::debug!("{} from {} found no targets", spell.id, caster.id());
        return Vec::new();
    }

    let origin = falloff_origin(caster, spell, target);
    let config = world.config();
    let prepared = map_parallel(targets, config.parallel_scan_threshold, config.parallel_workers, &|living| {
        let effectiveness = match origin {
            Some((center, reach)) if reach > 0.0 => (1.0 - f64::from(center.distance(living.position()) / reach)).max(0.0),
            _ => 1.0,
        };
        Prepared { defender: world.combatant(&living), living, effectiveness }
    });

    let resolver = world.resolver();
    let scheduler = world.scheduler();
    let attacker = world.combatant(caster);
    let aggressive_npc = caster.is_npc() && spell.radius > 0.0 && spell.target == TargetMode::Enemy;
    let mut outcomes = Vec::with_capacity(prepared.len());

    for Prepared { living, defender, effectiveness } in prepared {
        if aggressive_npc {
            world.notify(SpellEvent::Aggro { npc: caster.id(), attacker: living.id(), amount: 1 });
        }
        let result = if resolver.roll_resist(&attacker, &defender, spell) {
            scheduler.resisted(caster, &living, spell, now);
            TargetResult::Resisted
        } else {
            TargetResult::Applied(scheduler.apply(caster, &living, spell, effectiveness, now))
        };
        outcomes.push(TargetOutcome { target: living.id(), spell: spell.id, result });
    }
    outcomes
}

/// Center and reach of the damage falloff of harmful area spells.
fn falloff_origin(caster: &Living, spell: &SpellDefinition, target: Option<&Arc<Living>>) -> Option<(Vec3, f32)> {
    if spell.radius <= 0.0 || spell.has_positive_effect() {
        return None;
    }
    match spell.target {
        TargetMode::Area => caster.state().ground_target.map(|ground| (ground, spell.radius)),
        TargetMode::Cone => Some((caster.position(), spell.range)),
        _ => {
            let center = match target {
                Some(target) if spell.range > 0.0 => target.position(),
                _ => caster.position(),
            };
            Some((center, spell.radius))
        }
    }
}

/// Maps `items` with `f`, on scoped worker threads when there are more than
/// `threshold` of them. Output order matches input order.
fn map_parallel<T, F>(items: Vec<Arc<Living>>, threshold: usize, workers: usize, f: &F) -> Vec<T>
where
    T: Send,
    F: Fn(Arc<Living>) -> T + Sync,
{
    if items.len() <= threshold.max(1) || workers <= 1 {
        return items.into_iter().map(f).collect();
    }

    let chunk = items.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk)
            .map(|part| scope.spawn(move || part.iter().map(|l| f(Arc::clone(l))).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
            .collect()
    })
}
