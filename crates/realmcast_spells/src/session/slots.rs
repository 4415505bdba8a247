//! Per-caster cast slots.
//!
//! ```text
//! CastSlots
//! └─ RwLock<HashMap<EntityId, Arc<Mutex<CasterSlots>>>>
//!                                   ├─ current   channeled cast (or held focus)
//!                                   ├─ queued    next channeled cast
//!                                   └─ instant   instant cast
//! ```
//!
//! The map lock is only held to find or insert a caster's entry; each caster's
//! slots have their own mutex. Resolution never takes a slot lock: attacks it
//! causes are buffered on the [`World`] and fed to
//! [`CastSlots::caster_attacked`] once every caster has advanced.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use realmcast_core::{EntityId, Living, SpellDefinition, SpellId};
use realmcast_shared::Tick;

use super::{CastRejection, CastSession, CastStages, CastState, Casting, TargetOutcome};
use crate::error::{panic_message, SpellError};
use crate::world::World;

/// How [`CastSlots::begin_cast`] took a cast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The cast holds a slot and advances from the next tick.
    Started,
    /// Waiting behind the running channeled cast.
    Queued,
}

/// What happened to a session that left its slot.
#[derive(Clone, Debug)]
pub struct CastReport {
    /// Caster.
    pub caster: EntityId,
    /// Spell, if known.
    pub spell: Option<SpellId>,
    /// States entered, oldest first.
    pub trail: Vec<CastState>,
    /// Interrupted before resolving.
    pub interrupted: bool,
    /// Set when the session faulted and was dropped.
    pub fault: Option<SpellError>,
    /// Resolution outcomes.
    pub outcomes: Vec<TargetOutcome>,
}

impl CastReport {
    fn of(session: &CastSession) -> Self {
        Self {
            caster: session.caster().id(),
            spell: Some(session.spell().id),
            trail: session.trail().to_vec(),
            interrupted: session.is_interrupted(),
            fault: None,
            outcomes: session.outcomes().to_vec(),
        }
    }

    /// Whether the cast resolved.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.trail.contains(&CastState::Finished)
    }
}

#[derive(Default)]
struct CasterSlots {
    current: Option<CastSession>,
    queued: Option<CastSession>,
    instant: Option<CastSession>,
}

/// Cast slots of every caster.
#[derive(Default)]
pub struct CastSlots {
    slots: RwLock<HashMap<EntityId, Arc<Mutex<CasterSlots>>>>,
}

impl CastSlots {
    fn entry(&self, caster: EntityId) -> Arc<Mutex<CasterSlots>> {
        if let Some(slots) = self.slots.read().get(&caster) {
            return Arc::clone(slots);
        }
        Arc::clone(self.slots.write().entry(caster).or_default())
    }

    fn find(&self, caster: EntityId) -> Option<Arc<Mutex<CasterSlots>>> {
        self.slots.read().get(&caster).cloned()
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Starts or queues a cast of `spell` by `caster`.
    ///
    /// `target` overrides the caster's current target. Instant spells use
    /// the instant slot. A channeled spell while another channeled cast runs
    /// or waits for its first tick is queued if the caster has spell queueing on and refused otherwise; a
    /// held focus is dropped for it. Refused casts are reported to the caster
    /// and leave every slot untouched.
    pub fn begin_cast(
        &self,
        world: &World,
        caster: &Arc<Living>,
        spell: Arc<SpellDefinition>,
        target: Option<EntityId>,
        now: Tick,
    ) -> Result<Admission, CastRejection> {
        let handle = self.entry(caster.id());
        let mut slots = handle.lock();
        let mut session = CastSession::new(Arc::clone(caster), spell, target);

        if session.spell().is_instant() {
            if slots.instant.is_some() {
                return Err(session.refuse(world, CastRejection::AlreadyCasting));
            }
            session.admit(world, now)?;
            slots.instant = Some(session);
            return Ok(Admission::Started);
        }

        let running = slots.current.as_ref().map(CastSession::state);
        if matches!(running, Some(CastState::Precast | CastState::Casting)) {
            if !caster.state().spell_queue {
                return Err(session.refuse(world, CastRejection::AlreadyCasting));
            }
            tracing::debug!("{} queues {}", caster.id(), session.spell().id);
            slots.queued = Some(session);
            return Ok(Admission::Queued);
        }

        session.admit(world, now)?;
        if let Some(mut focus) = slots.current.take() {
            focus.cancel_focus(world);
        }
        slots.current = Some(session);
        Ok(Admission::Started)
    }

    // =========================================================================
    // Interrupts
    // =========================================================================

    /// `attacker` hit `caster`. Interrupts a channeled cast in its first half
    /// when the interrupt roll succeeds.
    ///
    /// Uninterruptible spells and casters that are uninterruptible or
    /// quick-casting are never interrupted this way.
    pub fn caster_attacked(&self, world: &World, caster: EntityId, attacker: EntityId, now: Tick) -> bool {
        let registry = world.registry();
        let (Some(handle), Some(victim), Some(attacker)) = (self.find(caster), registry.get(caster), registry.get(attacker))
        else {
            return false;
        };
        let mut slots = handle.lock();
        let Some(session) = slots.current.as_mut() else {
            return false;
        };
        if session.state() != CastState::Casting || session.spell().uninterruptible {
            return false;
        }
        let immune = {
            let state = victim.state();
            state.uninterruptible || state.quick_cast
        };
        if immune || now >= session.started_at() + session.cast_time() / 2 {
            return false;
        }
        if !world.resolver().roll_interrupt(&world.combatant(&victim), &world.combatant(&attacker)) {
            return false;
        }

        world.message(caster, format!("{} attacks you and your spell is interrupted!", attacker.name()));
        let interrupted = session.interrupt(world);
        settle(world, caster, &mut slots);
        interrupted
    }

    /// Interrupts the channeled cast of `caster` and clears its queue.
    pub fn interrupt(&self, world: &World, caster: EntityId) -> bool {
        let Some(handle) = self.find(caster) else {
            return false;
        };
        let mut slots = handle.lock();
        let interrupted = slots.current.as_mut().is_some_and(|session| session.interrupt(world));
        settle(world, caster, &mut slots);
        interrupted
    }

    /// `caster` moved or strafed.
    pub fn caster_moves(&self, world: &World, caster: EntityId) -> bool {
        let Some(handle) = self.find(caster) else {
            return false;
        };
        let mut slots = handle.lock();
        let handled = slots.current.as_mut().is_some_and(|session| session.caster_moves(world));
        settle(world, caster, &mut slots);
        handled
    }

    /// Ends the focus `caster` holds, if any.
    pub fn cancel_focus(&self, world: &World, caster: EntityId) -> bool {
        let Some(handle) = self.find(caster) else {
            return false;
        };
        let mut slots = handle.lock();
        let cancelled = slots.current.as_mut().is_some_and(|session| session.cancel_focus(world));
        settle(world, caster, &mut slots);
        cancelled
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether `caster` is channeling.
    #[must_use]
    pub fn is_casting(&self, caster: EntityId) -> bool {
        self.current_state(caster) == Some(CastState::Casting)
    }

    /// State of the channeled slot of `caster`.
    #[must_use]
    pub fn current_state(&self, caster: EntityId) -> Option<CastState> {
        self.find(caster).and_then(|handle| handle.lock().current.as_ref().map(CastSession::state))
    }

    /// Spell in the channeled slot of `caster`.
    #[must_use]
    pub fn current_spell(&self, caster: EntityId) -> Option<SpellId> {
        self.find(caster).and_then(|handle| handle.lock().current.as_ref().map(|s| s.spell().id))
    }

    /// Spell waiting behind the channeled cast of `caster`.
    #[must_use]
    pub fn queued_spell(&self, caster: EntityId) -> Option<SpellId> {
        self.find(caster).and_then(|handle| handle.lock().queued.as_ref().map(|s| s.spell().id))
    }

    /// Spell in the instant slot of `caster`.
    #[must_use]
    pub fn instant_spell(&self, caster: EntityId) -> Option<SpellId> {
        self.find(caster).and_then(|handle| handle.lock().instant.as_ref().map(|s| s.spell().id))
    }

    /// Cast bar stages of the running channeled cast of `caster`.
    #[must_use]
    pub fn stages(&self, world: &World, caster: EntityId) -> Option<CastStages> {
        let max_stage = world.config().spell_interrupt_max_stage_length;
        let handle = self.find(caster)?;
        let slots = handle.lock();
        slots.current.as_ref().filter(|s| s.state() == CastState::Casting).map(|s| s.stages(max_stage))
    }

    /// Number of casters with any occupied slot.
    #[must_use]
    pub fn active_casters(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|handle| {
                let slots = handle.lock();
                slots.current.is_some() || slots.instant.is_some() || slots.queued.is_some()
            })
            .count()
    }

    /// Drops every slot of `caster` without resolving anything.
    pub fn forget(&self, world: &World, caster: EntityId) {
        if self.slots.write().remove(&caster).is_some() {
            tracing::debug!("cast slots of {} released", caster);
        }
        world.registry().remove_component::<Casting>(caster);
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advances every caster's sessions by one tick, in id order, then feeds
    /// the attacks resolution raised into the defenders' casts.
    ///
    /// A session that panics is dropped with its caster's other slots; the
    /// rest of the tick carries on.
    pub fn advance_all(&self, world: &World, now: Tick) -> Vec<CastReport> {
        let mut handles: Vec<_> = self.slots.read().iter().map(|(id, slots)| (*id, Arc::clone(slots))).collect();
        handles.sort_unstable_by_key(|(id, _)| *id);

        let mut reports = Vec::new();
        for (caster, handle) in handles {
            let mut slots = handle.lock();
            let advanced = catch_unwind(AssertUnwindSafe(|| {
                if let Some(session) = slots.instant.as_mut() {
                    session.tick(world, now);
                }
                if let Some(session) = slots.current.as_mut() {
                    session.tick(world, now);
                }
                settle(world, caster, &mut slots)
            }));

            match advanced {
                Ok(done) => reports.extend(done),
                Err(payload) => reports.push(clear_faulted(world, caster, &mut slots, payload.as_ref())),
            }
        }

        for notice in world.take_attacks() {
            let defender = notice.defender;
            let fed = catch_unwind(AssertUnwindSafe(|| self.caster_attacked(world, defender, notice.attacker, now)));
            if let Err(payload) = fed {
                if let Some(handle) = self.find(defender) {
                    reports.push(clear_faulted(world, defender, &mut handle.lock(), payload.as_ref()));
                }
            }
        }
        reports
    }
}

/// Empties the slots of a caster whose session panicked.
fn clear_faulted(
    world: &World,
    caster: EntityId,
    slots: &mut CasterSlots,
    payload: &(dyn std::any::Any + Send),
) -> CastReport {
    let fault = SpellError::SessionFault { caster, reason: panic_message(payload) };
    tracing::error!("{}; slots cleared", fault);
    let spell = slots.current.as_ref().or(slots.instant.as_ref()).map(|s| s.spell().id);
    *slots = CasterSlots::default();
    world.registry().remove_component::<Casting>(caster);
    CastReport { caster, spell, trail: Vec::new(), interrupted: false, fault: Some(fault), outcomes: Vec::new() }
}

/// Releases sessions that reached Cleanup, promotes the queue and keeps the
/// [`Casting`] component in step with the channeled slot.
fn settle(world: &World, caster: EntityId, slots: &mut CasterSlots) -> Vec<CastReport> {
    let mut done = Vec::new();
    if slots.instant.as_ref().is_some_and(|s| s.state() == CastState::Cleanup) {
        if let Some(session) = slots.instant.take() {
            done.push(CastReport::of(&session));
        }
    }

    if slots.current.as_ref().is_some_and(|s| s.state() == CastState::Cleanup) {
        if let Some(session) = slots.current.take() {
            let queue_on = session.caster().state().spell_queue;
            if session.is_interrupted() || !queue_on {
                slots.queued = None;
            } else {
                slots.current = slots.queued.take();
            }
            done.push(CastReport::of(&session));
        }
    }

    let casting = slots.current.as_ref().is_some_and(|s| s.state() == CastState::Casting);
    let registry = world.registry();
    if casting {
        registry.add_component::<Casting>(caster);
    } else {
        registry.remove_component::<Casting>(caster);
    }
    done
}
