//! Core tick runtime for the galaxy strategy server.
//!
//! A single simulation thread drives [`TickScheduler`], which runs world
//! updates, combat resolution and population governance once per tick and
//! adapts its optional work to the measured tick latency.

pub mod budget;
pub mod combat;
pub mod config;
pub mod demo;
mod entity;
pub mod governor;
pub mod invasion;
pub mod runtime;
pub mod scheduler;
mod world;

use std::sync::Arc;

pub use budget::{BudgetDirective, PerfMetrics, TickBudgetMonitor, TickSample, WarningLevel};
pub use combat::{CombatEvent, CombatReport, CombatResolver, DamageReport, TargetedHit};
pub use config::{
    load_runtime_config_from_env, RuntimeConfig, RuntimeConfigError, UnitDefinition, UnitRoles,
};
pub use entity::{
    EmpireId, Entity, EntityArena, EntityId, EntityKind, EntitySpec, EntityStore, PlanetId,
};
pub use governor::{
    CleanupSummary, PopulationGovernor, PopulationHealth, PopulationStats, RemovalReason,
};
pub use invasion::{InvasionOutcome, InvasionResult};
pub use runtime::{ActionError, SimCommand, Simulation};
pub use scheduler::{
    NullHost, TickError, TickGate, TickHost, TickMetrics, TickOutcome, TickReport,
    TickScheduler, TickSummary,
};
pub use world::{
    Empire, EmpireRegistry, EmpireRoster, Planet, StarMap, StarSystem, SystemId,
    TerrainEffects, Topology, World,
};

/// Construct a scheduler over the demo galaxy with the given host.
pub fn build_demo_scheduler<H: TickHost>(config: Arc<RuntimeConfig>, host: H) -> TickScheduler<H> {
    TickScheduler::new(Simulation::new(config, demo::demo_world()), host)
}
