//! # Inbound Commands
//!
//! Whatever reaches the simulation from outside (player input, AI, combat
//! from other systems) arrives as a [`Command`] on a bounded channel and is
//! applied at the start of the next step, in arrival order.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use realmcast_core::{EffectId, EntityId, SpellId};

use crate::error::{SimError, SimResult};

/// A request to the simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Begin casting a spell from the catalog.
    BeginCast {
        /// Caster.
        caster: EntityId,
        /// Spell.
        spell: SpellId,
        /// Explicit target; the caster's current target when `None`.
        target: Option<EntityId>,
    },
    /// A caster was hit.
    CasterAttacked {
        /// Entity that was hit.
        caster: EntityId,
        /// Entity that hit it.
        attacker: EntityId,
    },
    /// A caster moved or strafed.
    CasterMoved {
        /// Entity that moved.
        caster: EntityId,
    },
    /// Cancel an active effect.
    CancelEffect {
        /// Effect to remove.
        effect: EffectId,
    },
}

/// Cloneable producer end of the command queue.
#[derive(Clone)]
pub struct CommandSender {
    inner: Sender<Command>,
    capacity: usize,
}

impl CommandSender {
    /// Queues `command` without blocking.
    ///
    /// # Errors
    ///
    /// [`SimError::QueueFull`] when the queue is full, [`SimError::Stopped`]
    /// when the simulation is gone.
    pub fn send(&self, command: Command) -> SimResult<()> {
        self.inner.try_send(command).map_err(|err| match err {
            TrySendError::Full(dropped) => {
                tracing::warn!("command queue full, dropped {:?}", dropped);
                SimError::QueueFull { capacity: self.capacity }
            }
            TrySendError::Disconnected(_) => SimError::Stopped,
        })
    }

    /// Commands waiting to be applied.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.len()
    }
}

/// Consumer end, owned by the simulation.
pub(crate) struct CommandQueue {
    receiver: Receiver<Command>,
    sender: CommandSender,
}

impl CommandQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (inner, receiver) = bounded(capacity);
        Self { receiver, sender: CommandSender { inner, capacity } }
    }

    pub(crate) fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Everything queued right now, oldest first.
    pub(crate) fn drain(&self) -> Vec<Command> {
        self.receiver.try_iter().collect()
    }
}
