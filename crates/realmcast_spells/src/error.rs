//! # Spell Engine Error Types
//!
//! Errors are for broken inputs and faults only. A cast that fails a rule
//! (out of range, no power, locked out) is not an error: it is a
//! [`CastRejection`](crate::session::CastRejection).

use realmcast_core::{EffectId, EntityId, SpellId};
use thiserror::Error;

/// Errors that can occur in the spell engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpellError {
    /// A configuration or catalog file could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A file could not be read.
    #[error("cannot read {path}: {reason}")]
    Io {
        /// Path that failed.
        path: String,
        /// OS error text.
        reason: String,
    },

    /// The spell catalog defines the same id twice.
    #[error("duplicate spell id: {0}")]
    DuplicateSpell(SpellId),

    /// A spell references a spell that does not exist.
    #[error("unknown spell: {0}")]
    UnknownSpell(SpellId),

    /// An entity handle does not resolve.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// A cast session faulted and was forced to cleanup.
    #[error("cast session of {caster} faulted: {reason}")]
    SessionFault {
        /// Caster whose session faulted.
        caster: EntityId,
        /// Panic payload or description.
        reason: String,
    },

    /// An effect faulted while being swept and was removed.
    #[error("effect {effect:?} of {spell} faulted: {reason}")]
    EffectFault {
        /// Effect that faulted.
        effect: EffectId,
        /// Its spell.
        spell: SpellId,
        /// Panic payload or description.
        reason: String,
    },
}

impl From<toml::de::Error> for SpellError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Result type for spell engine operations.
pub type SpellResult<T> = Result<T, SpellError>;
