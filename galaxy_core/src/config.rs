use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BUILTIN_RUNTIME_CONFIG: &str = include_str!("data/runtime_config.json");

bitflags! {
    /// Combat roles granted by a unit definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UnitRoles: u8 {
        /// Boosts the total attack of its side.
        const FLEET_SUPPORT = 0b0000_0001;
        /// Reduces damage received by its side.
        const DEFENSIVE_SUPPORT = 0b0000_0010;
        /// Multiplies damage dealt to structures.
        const BOMBARDMENT = 0b0000_0100;
    }
}

impl Default for UnitRoles {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitDefinition {
    pub roles: UnitRoles,
    /// Extra importance granted to named special units during eviction scoring.
    pub importance_bonus: f32,
}

/// Population capacity constants, fixed for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityLimits {
    pub soft_cap: usize,
    pub hard_cap: usize,
    pub warning_threshold: usize,
    pub per_empire_cap: usize,
    pub cleanup_batch: usize,
    pub hard_batch_multiplier: usize,
    /// Structures above this hp fraction are exempt from capacity eviction.
    pub structure_hp_floor: f32,
}

impl Default for EntityLimits {
    fn default() -> Self {
        Self {
            soft_cap: 3000,
            hard_cap: 5000,
            warning_threshold: 2500,
            per_empire_cap: 1000,
            cleanup_batch: 100,
            hard_batch_multiplier: 5,
            structure_hp_floor: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickBudget {
    pub target_ms: u64,
    pub warning_ms: f64,
    pub critical_ms: f64,
    pub recovery_ticks: u32,
    pub panic_cleanup_freq: u64,
    pub cleanup_freq: u64,
    pub history_len: usize,
    pub slow_streak_threshold: u32,
}

impl Default for TickBudget {
    fn default() -> Self {
        Self {
            target_ms: 1000,
            warning_ms: 100.0,
            critical_ms: 200.0,
            recovery_ticks: 30,
            panic_cleanup_freq: 10,
            cleanup_freq: 60,
            history_len: 60,
            slow_streak_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub victory_check_interval: u64,
    pub broadcast_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            victory_check_interval: 10,
            broadcast_interval: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatTuning {
    pub fleet_support_attack_bonus: f32,
    pub defensive_support_reduction: f32,
    pub bombardment_per_unit: f32,
    pub bombardment_cap: f32,
    pub targeted_range_scale: f32,
    pub targeted_variance: f32,
    pub invasion_variance: f32,
    pub invasion_max_rounds: u32,
}

impl CombatTuning {
    /// Invasions are always bounded to between 1 and 10 rounds.
    pub fn invasion_rounds(&self) -> u32 {
        self.invasion_max_rounds.clamp(1, 10)
    }
}

impl Default for CombatTuning {
    fn default() -> Self {
        Self {
            fleet_support_attack_bonus: 0.2,
            defensive_support_reduction: 0.25,
            bombardment_per_unit: 0.5,
            bombardment_cap: 2.0,
            targeted_range_scale: 10.0,
            targeted_variance: 0.2,
            invasion_variance: 0.3,
            invasion_max_rounds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    pub structure_bias: f32,
    pub structure_hp_weight: f32,
    pub unit_base: f32,
    pub hp_weight: f32,
    pub attack_weight: f32,
    pub in_transit_bonus: f32,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            structure_bias: 1000.0,
            structure_hp_weight: 100.0,
            unit_base: 100.0,
            hp_weight: 50.0,
            attack_weight: 2.0,
            in_transit_bonus: 50.0,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub entity_limits: EntityLimits,
    pub tick_budget: TickBudget,
    pub scheduler: SchedulerConfig,
    pub combat: CombatTuning,
    pub importance: ImportanceWeights,
    pub definitions: BTreeMap<String, UnitDefinition>,
    pub rng_seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            entity_limits: EntityLimits::default(),
            tick_budget: TickBudget::default(),
            scheduler: SchedulerConfig::default(),
            combat: CombatTuning::default(),
            importance: ImportanceWeights::default(),
            definitions: BTreeMap::new(),
            rng_seed: 0x5EED_CAFE,
        }
    }
}

impl RuntimeConfig {
    /// Parses the embedded config, falling back to compiled defaults.
    pub fn builtin() -> Self {
        match Self::from_json_str(BUILTIN_RUNTIME_CONFIG) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    target: "galaxy::config",
                    error = %err,
                    "runtime_config.builtin_invalid"
                );
                Self::default()
            }
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, RuntimeConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| RuntimeConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn definition(&self, def_name: &str) -> Option<&UnitDefinition> {
        self.definitions.get(def_name)
    }

    pub fn roles_for(&self, def_name: &str) -> UnitRoles {
        self.definition(def_name)
            .map(|def| def.roles)
            .unwrap_or_default()
    }

    pub fn with_definition(mut self, def_name: &str, definition: UnitDefinition) -> Self {
        self.definitions.insert(def_name.to_string(), definition);
        self
    }
}

#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("failed to parse runtime config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read runtime config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Loads the config named by `RUNTIME_CONFIG_PATH`, or the builtin one.
pub fn load_runtime_config_from_env() -> (Arc<RuntimeConfig>, Option<PathBuf>) {
    if let Some(path) = env::var("RUNTIME_CONFIG_PATH").ok().map(PathBuf::from) {
        match RuntimeConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "galaxy::config",
                    path = %path.display(),
                    "runtime_config.loaded=file"
                );
                return (Arc::new(config), Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "galaxy::config",
                    path = %path.display(),
                    error = %err,
                    "runtime_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "galaxy::config", "runtime_config.loaded=builtin");
    (Arc::new(RuntimeConfig::builtin()), None)
}
