//! # Simulation Configuration
//!
//! ```toml
//! tick_step = 50
//! command_capacity = 4096
//! spell_catalog = "data/spells.toml"
//!
//! [spells]
//! max_concentration_effects = 20
//! ```
//!
//! Missing keys take their defaults; the `[spells]` table is a
//! [`SpellConfig`].

use std::path::{Path, PathBuf};

use realmcast_shared::Tick;
use realmcast_spells::{SpellConfig, SpellError};
use serde::Deserialize;

use crate::error::SimResult;

/// Driver configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Game time (ticks) the clock advances per simulation step.
    pub tick_step: Tick,
    /// Bounded capacity of the inbound command queue.
    pub command_capacity: usize,
    /// Bounded capacity of the outbound event bus.
    pub event_capacity: usize,
    /// Pre-allocated NPC slots.
    pub npc_capacity: usize,
    /// Wall-clock duration (µs) above which a step is logged as slow.
    pub slow_tick_us: u64,
    /// Spell catalog file. Relative paths in a loaded file resolve against
    /// the file's directory.
    pub spell_catalog: Option<PathBuf>,
    /// Casting pipeline tunables.
    pub spells: SpellConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_step: 50,
            command_capacity: 4096,
            event_capacity: 8192,
            npc_capacity: 10_000,
            slow_tick_us: 50_000,
            spell_catalog: None,
            spells: SpellConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed TOML, unknown keys or out-of-range values.
    pub fn from_toml_str(text: &str) -> SimResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// As [`SimulationConfig::from_toml_str`], plus unreadable files.
    pub fn load(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| SpellError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let (Some(catalog), Some(dir)) = (config.spell_catalog.as_mut(), path.parent()) {
            if catalog.is_relative() {
                *catalog = dir.join(&*catalog);
            }
        }
        tracing::info!("simulation config loaded from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges, including the `[spells]` table.
    ///
    /// # Errors
    ///
    /// Returns [`SpellError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> SimResult<()> {
        if self.tick_step == 0 {
            return Err(SpellError::InvalidConfig("tick_step must be > 0".into()).into());
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(SpellError::InvalidConfig("queue capacities must be > 0".into()).into());
        }
        self.spells.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(SimulationConfig::from_toml_str("").unwrap(), SimulationConfig::default());
    }

    #[test]
    fn test_nested_spell_table() {
        let config = SimulationConfig::from_toml_str(
            "tick_step = 100\nspell_catalog = \"spells.toml\"\n[spells]\nmax_concentration_effects = 3\n",
        )
        .unwrap();
        assert_eq!(config.tick_step, 100);
        assert_eq!(config.spell_catalog, Some(PathBuf::from("spells.toml")));
        assert_eq!(config.spells.max_concentration_effects, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SimulationConfig::from_toml_str("tick_step = 0"),
            Err(SimError::Spells(SpellError::InvalidConfig(_)))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("[spells]\nparallel_workers = 0"),
            Err(SimError::Spells(SpellError::InvalidConfig(_)))
        ));
        assert!(matches!(
            SimulationConfig::from_toml_str("tick_rate = 60"),
            Err(SimError::Spells(SpellError::Parse(_)))
        ));
    }

    #[test]
    fn test_shipped_config_resolves_catalog() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
        let config = SimulationConfig::load(&dir.join("realmcast.toml")).unwrap();
        assert_eq!(config.spell_catalog, Some(dir.join("spells.toml")));
    }

    #[test]
    fn test_missing_file() {
        let err = SimulationConfig::load(Path::new("/nonexistent/realmcast.toml")).unwrap_err();
        assert!(matches!(err, SimError::Spells(SpellError::Io { .. })));
    }
}
