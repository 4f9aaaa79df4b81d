//! Engine configuration.
//!
//! Changeover constants, material families and slot-search limits are
//! injected at construction instead of compiled in, so plants (and tests)
//! can supply their own tables.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. `USTAGE__*` environment variables (`USTAGE__SEARCH__MAX_PROBES=500`).
//!
//! ```toml
//! [changeover]
//! same_family_minutes = 30
//! cross_family_minutes = 120
//! default_minutes = 60
//!
//! [changeover.families]
//! titanium = ["Ti-6Al-4V", "Ti-6Al-2Sn-4Zr-6Mo"]
//! nickel = ["Inconel 718", "Inconel 625"]
//!
//! [search]
//! horizon_hours = 336.0
//! calendar_resolution_minutes = 15
//! max_probes = 10000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub use ::config::ConfigError;

use crate::models::{hours_to_ms, minutes_to_ms};

const ENV_PREFIX: &str = "USTAGE";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub changeover: ChangeoverConfig,
    pub search: SearchConfig,
}

impl EngineConfig {
    /// Loads defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

/// A changeover time for one specific material pair (either direction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairOverride {
    pub from: String,
    pub to: String,
    pub minutes: i64,
}

/// Material-changeover table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeoverConfig {
    /// Different grades of the same family (e.g., two titanium alloys).
    pub same_family_minutes: i64,
    /// Materials of different families (e.g., titanium to nickel).
    pub cross_family_minutes: i64,
    /// At least one material is unclassified.
    pub default_minutes: i64,
    /// Family name → member materials.
    pub families: BTreeMap<String, Vec<String>>,
    pub pair_overrides: Vec<PairOverride>,
}

impl Default for ChangeoverConfig {
    fn default() -> Self {
        Self {
            same_family_minutes: 30,
            cross_family_minutes: 120,
            default_minutes: 60,
            families: BTreeMap::new(),
            pair_overrides: Vec::new(),
        }
    }
}

impl ChangeoverConfig {
    pub fn with_family<I, S>(mut self, family: impl Into<String>, materials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.families
            .insert(family.into(), materials.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pair_override(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        minutes: i64,
    ) -> Self {
        self.pair_overrides.push(PairOverride {
            from: from.into(),
            to: to.into(),
            minutes,
        });
        self
    }
}

/// Slot-search limits for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// How far past the earliest start a candidate machine is searched.
    pub horizon_hours: f64,
    /// Sampling step for the operating calendar.
    pub calendar_resolution_minutes: i64,
    /// Probe budget per candidate machine.
    pub max_probes: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 336.0,
            calendar_resolution_minutes: 15,
            max_probes: 10_000,
        }
    }
}

impl SearchConfig {
    pub fn horizon_ms(&self) -> i64 {
        hours_to_ms(self.horizon_hours)
    }

    /// Calendar sampling step (ms), never below one minute.
    pub fn resolution_ms(&self) -> i64 {
        minutes_to_ms(self.calendar_resolution_minutes.max(1))
    }
}
