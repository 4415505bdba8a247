//! # Spell Engine Configuration
//!
//! Operator tunables, loaded once at startup from TOML. Every field has a
//! production default, so an empty file is a valid configuration.
//!
//! ```toml
//! max_concentration_effects = 20
//! pve_spell_con_hit_percent = 10.0
//! override_deck_rng = false
//! ```
//!
//! The spell catalog is a separate TOML file with one `[[spell]]` table per
//! definition (see [`parse_spell_book`]).

use std::collections::HashSet;
use std::path::Path;

use realmcast_core::{SpellBook, SpellDefinition};
use realmcast_shared::Tick;
use serde::Deserialize;

use crate::error::{SpellError, SpellResult};

/// Tunables of the casting pipeline.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpellConfig {
    /// Concentration/pulse effects a caster may maintain at once.
    pub max_concentration_effects: usize,
    /// To-hit penalty per con level against non-players.
    pub pve_spell_con_hit_percent: f64,
    /// To-hit bonus per extra attacker on the target (non-PvP).
    pub missrate_reduction_per_attacker: i32,
    /// Damage lost per point of to-hit below 55, in percent.
    pub spell_hit_chance_damage_reduction_multiplier: f64,
    /// Damage multiplier when a player (or realm pet) hits a player.
    pub pvp_spell_damage: f64,
    /// Damage multiplier when a player (or realm pet) hits a non-player.
    pub pve_spell_damage: f64,
    /// Use the shared RNG for resist rolls instead of per-caster decks.
    pub override_deck_rng: bool,
    /// When non-zero, pet spells are scaled elsewhere and skip the damage cap.
    pub pet_scale_spell_max_level: u8,
    /// Longest first/last cast-bar stage.
    pub spell_interrupt_max_stage_length: Tick,
    /// Lockout applied to a target that resisted a spell.
    pub spell_interrupt_duration: Tick,
    /// Base chance (percent) that an NPC attack interrupts a cast.
    pub base_interrupt_chance: i32,
    /// Damage cap as a multiple of the spell damage.
    pub damage_cap_multiplier: f64,
    /// Candidate lists longer than this are filtered on worker threads.
    pub parallel_scan_threshold: usize,
    /// Worker threads for parallel scans and resolution.
    pub parallel_workers: usize,
    /// Seed for the shared RNG; `None` seeds from the system clock.
    pub rng_seed: Option<u64>,
}

impl Default for SpellConfig {
    fn default() -> Self {
        Self {
            max_concentration_effects: 20,
            pve_spell_con_hit_percent: 10.0,
            missrate_reduction_per_attacker: 0,
            spell_hit_chance_damage_reduction_multiplier: 4.0,
            pvp_spell_damage: 1.0,
            pve_spell_damage: 1.0,
            override_deck_rng: false,
            pet_scale_spell_max_level: 0,
            spell_interrupt_max_stage_length: 1500,
            spell_interrupt_duration: 4500,
            base_interrupt_chance: 65,
            damage_cap_multiplier: realmcast_shared::DAMAGE_CAP_MULTIPLIER,
            parallel_scan_threshold: 256,
            parallel_workers: 4,
            rng_seed: None,
        }
    }
}

impl SpellConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SpellError::Parse`] for malformed TOML or unknown keys and
    /// [`SpellError::InvalidConfig`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> SpellResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SpellError::Io`] if the file cannot be read, otherwise as
    /// [`SpellConfig::from_toml_str`].
    pub fn load(path: &Path) -> SpellResult<Self> {
        let text = read(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("spell config loaded from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SpellError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> SpellResult<()> {
        if self.max_concentration_effects == 0 {
            return Err(SpellError::InvalidConfig("max_concentration_effects must be > 0".into()));
        }
        if self.pvp_spell_damage < 0.0 || self.pve_spell_damage < 0.0 {
            return Err(SpellError::InvalidConfig("spell damage multipliers must be >= 0".into()));
        }
        if self.damage_cap_multiplier <= 0.0 {
            return Err(SpellError::InvalidConfig("damage_cap_multiplier must be > 0".into()));
        }
        if self.parallel_workers == 0 {
            return Err(SpellError::InvalidConfig("parallel_workers must be > 0".into()));
        }
        if !(0..=100).contains(&self.base_interrupt_chance) {
            return Err(SpellError::InvalidConfig("base_interrupt_chance must be 0-100".into()));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    spell: Vec<SpellDefinition>,
}

/// Parses a spell catalog.
///
/// # Errors
///
/// Returns [`SpellError::Parse`] for malformed TOML,
/// [`SpellError::DuplicateSpell`] if an id appears twice and
/// [`SpellError::UnknownSpell`] if a sub-spell is not defined.
pub fn parse_spell_book(text: &str) -> SpellResult<SpellBook> {
    let catalog: CatalogFile = toml::from_str(text)?;

    let mut ids = HashSet::with_capacity(catalog.spell.len());
    for spell in &catalog.spell {
        if !ids.insert(spell.id) {
            return Err(SpellError::DuplicateSpell(spell.id));
        }
    }
    for spell in &catalog.spell {
        if let Some(missing) = spell.sub_spells.iter().find(|id| !ids.contains(id)) {
            return Err(SpellError::UnknownSpell(*missing));
        }
    }

    Ok(SpellBook::from_definitions(catalog.spell))
}

/// Reads and parses a spell catalog file.
///
/// # Errors
///
/// As [`parse_spell_book`], plus [`SpellError::Io`].
pub fn load_spell_book(path: &Path) -> SpellResult<SpellBook> {
    let book = parse_spell_book(&read(path)?)?;
    tracing::info!("{} spells loaded from {}", book.len(), path.display());
    Ok(book)
}

fn read(path: &Path) -> SpellResult<String> {
    std::fs::read_to_string(path).map_err(|err| SpellError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}
