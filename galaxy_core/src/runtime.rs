use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    budget::{BudgetDirective, TickBudgetMonitor},
    combat::{CombatReport, CombatResolver},
    config::RuntimeConfig,
    entity::{EmpireId, Entity, EntityId, EntitySpec, EntityStore, PlanetId},
    governor::{CleanupSummary, PopulationGovernor, PopulationStats},
    invasion::InvasionResult,
    world::{EmpireRegistry, Topology, World},
};

/// Reasons an externally requested action was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("planet {0} does not exist")]
    UnknownPlanet(PlanetId),
    #[error("empire {0} is not registered")]
    UnknownEmpire(EmpireId),
    #[error("empire {0} has been defeated")]
    DefeatedEmpire(EmpireId),
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),
    #[error("entity {0} is unowned")]
    UnownedEntity(EntityId),
    #[error("invasion requires at least one attacking unit")]
    NoAttackers,
    #[error("entity {entity} does not belong to empire {owner}")]
    MixedOwnership { entity: EntityId, owner: EmpireId },
    #[error("empire {0} already controls planet {1}")]
    AlreadyOwned(EmpireId, PlanetId),
    #[error("entity {0} cannot target a friendly entity")]
    FriendlyTarget(EntityId),
}

/// External action funneled into the simulation thread.
#[derive(Debug)]
pub enum SimCommand {
    Spawn(EntitySpec),
    SetTarget {
        attacker: EntityId,
        target: Option<EntityId>,
    },
    Invade {
        attackers: Vec<EntityId>,
        planet: PlanetId,
        reply: Option<Sender<Result<InvasionResult, ActionError>>>,
    },
    Stats {
        reply: Sender<PopulationStats>,
    },
    Shutdown,
}

/// Owning service instance: world state plus the combat, governance and
/// budget services that act on it. All mutation happens through `&mut self`
/// on the simulation thread.
#[derive(Debug)]
pub struct Simulation {
    config: Arc<RuntimeConfig>,
    world: World,
    combat: CombatResolver,
    governor: PopulationGovernor,
    monitor: TickBudgetMonitor,
    clock: u64,
}

impl Simulation {
    pub fn new(config: Arc<RuntimeConfig>, world: World) -> Self {
        Self {
            combat: CombatResolver::new(Arc::clone(&config)),
            governor: PopulationGovernor::new(Arc::clone(&config)),
            monitor: TickBudgetMonitor::new(config.tick_budget.clone()),
            config,
            world,
            clock: 0,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn governor(&self) -> &PopulationGovernor {
        &self.governor
    }

    pub fn monitor(&self) -> &TickBudgetMonitor {
        &self.monitor
    }

    /// Tick stamp applied to newly created entities.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn set_clock(&mut self, tick: u64) {
        self.clock = tick;
    }

    pub fn population(&self) -> usize {
        self.world.entities.len()
    }

    pub fn stats(&self) -> PopulationStats {
        self.governor.stats(&self.world.entities)
    }

    pub fn spawn(&mut self, spec: EntitySpec) -> Result<EntityId, ActionError> {
        if let Some(location) = spec.location {
            if self.world.star_map.planet(location).is_none() {
                return Err(ActionError::UnknownPlanet(location));
            }
        }
        if let Some(owner) = spec.owner {
            self.require_active(owner)?;
        }
        let def_name = spec.def_name.clone();
        let id = self.world.entities.insert(spec, self.clock);
        debug!(
            target: "galaxy::actions",
            entity = %id,
            def_name = %def_name,
            tick = self.clock,
            "entity.spawned"
        );
        Ok(id)
    }

    pub fn set_target(
        &mut self,
        attacker: EntityId,
        target: Option<EntityId>,
    ) -> Result<(), ActionError> {
        let attacker_entity = self
            .world
            .entities
            .get(attacker)
            .ok_or(ActionError::UnknownEntity(attacker))?;
        if let Some(target_id) = target {
            let target_entity = self
                .world
                .entities
                .get(target_id)
                .ok_or(ActionError::UnknownEntity(target_id))?;
            if attacker_entity.owner.is_some() && attacker_entity.owner == target_entity.owner {
                return Err(ActionError::FriendlyTarget(attacker));
            }
        }
        self.world.entities.set_target(attacker, target);
        Ok(())
    }

    /// Resolves an invasion and applies it: casualties are removed, survivors
    /// carry their wounds, and the planet changes hands on conquest.
    pub fn invade(
        &mut self,
        attacker_ids: &[EntityId],
        planet_id: PlanetId,
    ) -> Result<InvasionResult, ActionError> {
        let planet = self
            .world
            .star_map
            .planet(planet_id)
            .cloned()
            .ok_or(ActionError::UnknownPlanet(planet_id))?;

        let mut attackers: Vec<Entity> = Vec::with_capacity(attacker_ids.len());
        let mut invader: Option<EmpireId> = None;
        for &id in attacker_ids {
            let entity = self
                .world
                .entities
                .get(id)
                .ok_or(ActionError::UnknownEntity(id))?;
            if entity.is_structure() {
                continue;
            }
            let owner = entity.owner.ok_or(ActionError::UnownedEntity(id))?;
            match invader {
                None => invader = Some(owner),
                Some(expected) if expected != owner => {
                    return Err(ActionError::MixedOwnership {
                        entity: id,
                        owner: expected,
                    })
                }
                Some(_) => {}
            }
            attackers.push(entity.clone());
        }
        let invader = invader.ok_or(ActionError::NoAttackers)?;
        self.require_active(invader)?;
        if planet.owner == Some(invader) {
            return Err(ActionError::AlreadyOwned(invader, planet_id));
        }

        let attacking: HashSet<EntityId> = attackers.iter().map(|entity| entity.id).collect();
        let defenders: Vec<Entity> = self
            .world
            .entities
            .iter()
            .filter(|entity| {
                entity.location == Some(planet_id)
                    && entity.owner == planet.owner
                    && !attacking.contains(&entity.id)
            })
            .cloned()
            .collect();

        let result = self
            .combat
            .resolve_invasion(&attackers, &defenders, &planet);

        for id in result
            .destroyed_attackers
            .iter()
            .chain(result.destroyed_defenders.iter())
        {
            self.world.entities.remove(*id);
        }
        for &(id, damage) in &result.survivor_damage {
            self.world.entities.damage(id, damage);
        }

        if result.conquered {
            self.world.star_map.set_owner(planet_id, Some(invader));
            for entity in &attackers {
                if let Some(record) = self.world.entities.get_mut(entity.id) {
                    record.location = Some(planet_id);
                    record.in_transit = false;
                }
            }
            info!(
                target: "galaxy::actions",
                planet = %planet_id,
                %invader,
                previous_owner = ?planet.owner,
                "invasion.planet_captured"
            );
        }
        Ok(result)
    }

    /// Applies one external command. `Shutdown` is handled by the scheduler loop.
    pub fn apply(&mut self, command: SimCommand) {
        match command {
            SimCommand::Spawn(spec) => {
                if let Err(err) = self.spawn(spec) {
                    warn!(target: "galaxy::actions", error = %err, "spawn.rejected");
                }
            }
            SimCommand::SetTarget { attacker, target } => {
                if let Err(err) = self.set_target(attacker, target) {
                    warn!(
                        target: "galaxy::actions",
                        %attacker,
                        error = %err,
                        "target.rejected"
                    );
                }
            }
            SimCommand::Invade {
                attackers,
                planet,
                reply,
            } => {
                let result = self.invade(&attackers, planet);
                if let Err(err) = &result {
                    warn!(
                        target: "galaxy::actions",
                        %planet,
                        error = %err,
                        "invasion.rejected"
                    );
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            SimCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            SimCommand::Shutdown => {}
        }
    }

    pub fn run_combat(&mut self) -> CombatReport {
        self.combat
            .resolve_all_combat(&mut self.world.entities, &self.world.star_map)
    }

    pub fn run_governance(&mut self) -> CleanupSummary {
        self.governor.full_cleanup(
            &mut self.world.entities,
            &self.world.star_map,
            &self.world.empires,
        )
    }

    pub fn record_tick(&mut self, duration_ms: f64, tick: u64) -> BudgetDirective {
        self.monitor.record_tick(duration_ms, tick)
    }

    fn require_active(&self, owner: EmpireId) -> Result<(), ActionError> {
        match self.world.empires.empire(owner) {
            None => Err(ActionError::UnknownEmpire(owner)),
            Some(empire) if empire.defeated => Err(ActionError::DefeatedEmpire(owner)),
            Some(_) => Ok(()),
        }
    }
}
