//! # Simulation Error Types

use realmcast_core::{EntityId, SpellId};
use realmcast_spells::SpellError;
use thiserror::Error;

/// Errors raised by the simulation driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Configuration, catalog or session fault from the spell engine.
    #[error(transparent)]
    Spells(#[from] SpellError),

    /// The command queue is full; the command was dropped.
    #[error("command queue full ({capacity} pending)")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The simulation that owned the queue is gone.
    #[error("simulation stopped")]
    Stopped,

    /// A command named a caster that is not in the world.
    #[error("unknown caster: {0}")]
    UnknownCaster(EntityId),

    /// A command named a spell that is not in the catalog.
    #[error("unknown spell: {0}")]
    UnknownSpell(SpellId),

    /// Applying a command panicked; the command was dropped.
    #[error("command {command} faulted: {reason}")]
    CommandFault {
        /// The command, as debug text.
        command: String,
        /// Panic payload or description.
        reason: String,
    },
}

impl SimError {
    /// Whether this reports a caught panic rather than a bad input.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::CommandFault { .. }
                | Self::Spells(SpellError::SessionFault { .. } | SpellError::EffectFault { .. })
        )
    }
}

impl From<toml::de::Error> for SimError {
    fn from(err: toml::de::Error) -> Self {
        Self::Spells(SpellError::from(err))
    }
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
