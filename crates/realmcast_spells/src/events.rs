//! # Spell Event Bus
//!
//! Outbound notifications from the casting pipeline to the presentation,
//! AI and quest layers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   notify()   ┌─────────────┐   drain()   ┌──────────────┐
//! │ CastSession │─────────────>│   Event     │────────────>│ Presentation │
//! │  Scheduler  │              │   Channel   │             │  AI / Quests │
//! └─────────────┘              └─────────────┘             └──────────────┘
//! ```
//!
//! The core only ever *calls* a [`Notifier`]; it never subscribes to itself.
//! The default notifier is a bounded crossbeam channel: a full channel drops
//! the event and the tick carries on.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use realmcast_core::{DamageType, EffectId, EntityId, SpellId};
use realmcast_shared::Tick;

/// Why an effect was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// Toggled off or cancelled by game logic.
    Explicit,
    /// Ran out of time.
    Expired,
    /// A better effect of the same group replaced it.
    Overwritten,
    /// The caster could not pay the pulse cost.
    ResourceExhausted,
    /// The caster lost the instrument a song needs.
    InstrumentLost,
    /// The caster died.
    CasterDied,
    /// The caster moved while maintaining a focus spell.
    CasterMoved,
    /// Sweeping the effect faulted.
    Fault,
}

/// Everything the casting pipeline tells the outside world.
#[derive(Clone, Debug, PartialEq)]
pub enum SpellEvent {
    // =========================================================================
    // Cast lifecycle
    // =========================================================================
    /// A channeled cast started (cast-bar animation).
    CastStarted {
        /// Caster.
        caster: EntityId,
        /// Spell.
        spell: SpellId,
        /// Resolved target.
        target: Option<EntityId>,
        /// Cast duration in ticks.
        cast_time: Tick,
    },

    /// A cast was interrupted (interrupt animation to observers).
    CastInterrupted {
        /// Caster.
        caster: EntityId,
        /// Spell.
        spell: SpellId,
    },

    /// A cast resolved.
    CastFinished {
        /// Caster.
        caster: EntityId,
        /// Spell.
        spell: SpellId,
    },

    /// A rule check refused the cast.
    CastRejected {
        /// Caster.
        caster: EntityId,
        /// Spell.
        spell: SpellId,
        /// Player-facing reason.
        reason: String,
    },

    /// A focus spell was dropped.
    FocusLost {
        /// Caster.
        caster: EntityId,
        /// Spell.
        spell: SpellId,
    },

    // =========================================================================
    // Resolution
    // =========================================================================
    /// The target resisted.
    Resisted {
        /// Caster.
        caster: EntityId,
        /// Target.
        target: EntityId,
        /// Spell.
        spell: SpellId,
    },

    /// Damage landed.
    Damage {
        /// Caster.
        caster: EntityId,
        /// Target.
        target: EntityId,
        /// Spell.
        spell: SpellId,
        /// Damage type.
        damage_type: DamageType,
        /// Base damage dealt.
        amount: i32,
        /// Additional critical damage.
        critical: i32,
        /// Net resist adjustment (negative = damage removed).
        resist_modifier: i32,
    },

    /// Health restored.
    Healed {
        /// Caster.
        caster: EntityId,
        /// Target.
        target: EntityId,
        /// Spell.
        spell: SpellId,
        /// Health restored.
        amount: i32,
    },

    /// A target died from a spell.
    Killed {
        /// Killer.
        caster: EntityId,
        /// Victim.
        target: EntityId,
    },

    /// A duration effect started.
    EffectApplied {
        /// Effect.
        effect: EffectId,
        /// Spell.
        spell: SpellId,
        /// Carrier.
        owner: EntityId,
        /// Duration in ticks (0 = until cancelled).
        duration: Tick,
    },

    /// A duration effect ended.
    EffectRemoved {
        /// Effect.
        effect: EffectId,
        /// Spell.
        spell: SpellId,
        /// Carrier.
        owner: EntityId,
        /// Why.
        reason: CancelReason,
    },

    // =========================================================================
    // Side channels
    // =========================================================================
    /// Hostile NPC decision logic should raise aggro.
    Aggro {
        /// NPC that was affected.
        npc: EntityId,
        /// Entity to hate.
        attacker: EntityId,
        /// Amount of hate.
        amount: i32,
    },

    /// A chat-style message to one entity.
    Message {
        /// Recipient.
        to: EntityId,
        /// Text.
        text: String,
    },
}

/// Outbound observer interface.
pub trait Notifier: Send + Sync {
    /// Delivers one event. Must not block.
    fn notify(&self, event: SpellEvent);
}

/// Event bus.
///
/// Pre-allocates the channel with bounded capacity so a stalled consumer
/// cannot grow memory without bound.
pub struct EventBus {
    sender: Sender<SpellEvent>,
    receiver: Receiver<SpellEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum events in flight before new ones are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Creates a sender handle (clone for multiple producers).
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender { sender: self.sender.clone() }
    }

    /// Creates a receiver handle (clone for multiple consumers).
    #[must_use]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver { receiver: self.receiver.clone() }
    }

    /// Creates a new pair of sender and receiver.
    #[must_use]
    pub fn create_pair(capacity: usize) -> (EventSender, EventReceiver) {
        let bus = Self::new(capacity);
        (bus.sender(), bus.receiver())
    }
}

/// Handle for sending events.
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<SpellEvent>,
}

impl EventSender {
    /// Sends an event (non-blocking).
    ///
    /// Returns `false` if the channel is full or closed; the event is dropped.
    #[inline]
    pub fn send(&self, event: SpellEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!("event channel full, dropping {:?}", dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Notifier for EventSender {
    fn notify(&self, event: SpellEvent) {
        let _ = self.send(event);
    }
}

/// Handle for receiving events.
#[derive(Clone)]
pub struct EventReceiver {
    receiver: Receiver<SpellEvent>,
}

impl EventReceiver {
    /// Receives all pending events (non-blocking).
    #[inline]
    pub fn drain(&self) -> Vec<SpellEvent> {
        let mut events = Vec::with_capacity(self.receiver.len());
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Receives one event (non-blocking).
    #[inline]
    pub fn try_recv(&self) -> Option<SpellEvent> {
        self.receiver.try_recv().ok()
    }

    /// Returns the number of pending events.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Checks if there are pending events.
    #[inline]
    #[must_use]
    pub fn has_events(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: SpellEvent) {}
}
