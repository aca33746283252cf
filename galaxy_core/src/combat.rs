//! Combat resolution for one tick.
//!
//! Area combat is simultaneous: every side's damage is computed from the
//! state at the start of the pass, then applied. Each location with `k`
//! hostile sides costs `O(k²)` side pairs; `k` is bounded by the number of
//! empires present at one planet, so the pair loop stays.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    config::{RuntimeConfig, UnitRoles},
    entity::{EmpireId, Entity, EntityId, EntityStore, PlanetId},
    invasion::{self, InvasionResult},
    world::{Planet, TerrainEffects, Topology},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamageReport {
    pub attacker: EmpireId,
    pub defender: EmpireId,
    pub target: EntityId,
    pub amount: f32,
    pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombatEvent {
    pub location: PlanetId,
    pub description: String,
    pub damages: Vec<DamageReport>,
    pub combatants: Vec<EmpireId>,
}

impl CombatEvent {
    pub fn destroyed(&self) -> impl Iterator<Item = &DamageReport> {
        self.damages.iter().filter(|report| report.destroyed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetedHit {
    pub attacker: EntityId,
    pub target: EntityId,
    pub damage: f32,
    pub destroyed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombatReport {
    pub events: Vec<CombatEvent>,
    pub targeted: Vec<TargetedHit>,
}

impl CombatReport {
    pub fn destroyed_count(&self) -> usize {
        self.events
            .iter()
            .map(|event| event.destroyed().count())
            .sum::<usize>()
            + self.targeted.iter().filter(|hit| hit.destroyed).count()
    }
}

/// Per-owner aggregate at one location for one pass.
#[derive(Debug, Clone)]
pub struct CombatSide {
    pub owner: EmpireId,
    pub members: Vec<(EntityId, bool)>,
    pub total_attack: f32,
    pub damage_reduction: f32,
    pub bombers: u32,
    roles: UnitRoles,
}

impl CombatSide {
    fn new(owner: EmpireId) -> Self {
        Self {
            owner,
            members: Vec::new(),
            total_attack: 0.0,
            damage_reduction: 0.0,
            bombers: 0,
            roles: UnitRoles::empty(),
        }
    }

    fn add(&mut self, entity: &Entity, roles: UnitRoles) {
        self.members.push((entity.id, entity.is_structure()));
        self.total_attack += entity.attack.max(0.0);
        self.roles |= roles;
        if roles.contains(UnitRoles::BOMBARDMENT) {
            self.bombers += 1;
        }
    }

    pub fn has_role(&self, role: UnitRoles) -> bool {
        self.roles.contains(role)
    }
}

#[derive(Debug, Clone)]
pub struct CombatResolver {
    config: Arc<RuntimeConfig>,
    rng: ChaCha8Rng,
}

impl CombatResolver {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        Self { config, rng }
    }

    pub fn with_seed(config: Arc<RuntimeConfig>, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Builds the aggregated sides present at every location, keyed by owner.
    /// Unowned and dead entities never fight.
    pub fn build_sides<S>(&self, store: &S) -> BTreeMap<PlanetId, BTreeMap<EmpireId, CombatSide>>
    where
        S: EntityStore + ?Sized,
    {
        let tuning = &self.config.combat;
        let mut locations: BTreeMap<PlanetId, BTreeMap<EmpireId, CombatSide>> = BTreeMap::new();
        for entity in store.iter() {
            let (Some(location), Some(owner)) = (entity.location, entity.owner) else {
                continue;
            };
            if entity.is_dead() {
                continue;
            }
            let roles = self.config.roles_for(&entity.def_name);
            locations
                .entry(location)
                .or_default()
                .entry(owner)
                .or_insert_with(|| CombatSide::new(owner))
                .add(entity, roles);
        }

        for side in locations.values_mut().flat_map(|sides| sides.values_mut()) {
            if side.has_role(UnitRoles::FLEET_SUPPORT) {
                side.total_attack *= 1.0 + tuning.fleet_support_attack_bonus;
            }
            if side.has_role(UnitRoles::DEFENSIVE_SUPPORT) {
                side.damage_reduction = tuning.defensive_support_reduction.clamp(0.0, 1.0);
            }
        }
        locations
    }

    pub fn bombardment_multiplier(&self, bombers: u32) -> f32 {
        let tuning = &self.config.combat;
        1.0 + (bombers as f32 * tuning.bombardment_per_unit).min(tuning.bombardment_cap)
    }

    /// Damage one defending entity takes from one attacking side.
    ///
    /// Modifiers stack multiplicatively in a fixed order: side reduction,
    /// terrain, then bombardment against structures.
    pub fn damage_per_target(
        &self,
        attacker: &CombatSide,
        defender: &CombatSide,
        target_is_structure: bool,
        terrain: TerrainEffects,
    ) -> f32 {
        if defender.members.is_empty() {
            return 0.0;
        }
        let mut damage = attacker.total_attack / defender.members.len() as f32;
        damage *= 1.0 - defender.damage_reduction;
        damage *= 1.0 - terrain.defense_bonus.clamp(0.0, 1.0);
        if target_is_structure {
            damage *= self.bombardment_multiplier(attacker.bombers);
        }
        damage.max(0.0)
    }

    /// Resolves area combat at every contested location, then targeted attacks.
    pub fn resolve_all_combat<S, T>(&mut self, store: &mut S, topology: &T) -> CombatReport
    where
        S: EntityStore + ?Sized,
        T: Topology + ?Sized,
    {
        let mut report = CombatReport::default();
        let locations = self.build_sides(store);

        for (location, sides) in locations {
            if sides.len() < 2 {
                continue;
            }
            let planet = topology.planet(location);
            let terrain = planet
                .map(|planet| topology.terrain_effects(planet.system))
                .unwrap_or_default();

            let mut pending = Vec::new();
            for attacker in sides.values() {
                for defender in sides.values() {
                    if attacker.owner == defender.owner {
                        continue;
                    }
                    for &(target, is_structure) in &defender.members {
                        let amount =
                            self.damage_per_target(attacker, defender, is_structure, terrain);
                        pending.push((attacker.owner, defender.owner, target, amount));
                    }
                }
            }

            let mut destroyed: HashSet<EntityId> = HashSet::new();
            let mut damages = Vec::with_capacity(pending.len());
            for (attacker, defender, target, amount) in pending {
                if destroyed.contains(&target) || store.get(target).is_none() {
                    continue;
                }
                let killed = store.damage(target, amount);
                if killed {
                    store.remove(target);
                    destroyed.insert(target);
                }
                damages.push(DamageReport {
                    attacker,
                    defender,
                    target,
                    amount,
                    destroyed: killed,
                });
            }

            let combatants: Vec<EmpireId> = sides.keys().copied().collect();
            let place = planet
                .map(|planet| planet.name.clone())
                .unwrap_or_else(|| format!("planet {location}"));
            let description = format!(
                "Battle at {} between empires {}: {} destroyed",
                place,
                combatants
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                destroyed.len()
            );
            info!(
                target: "galaxy::combat",
                %location,
                sides = combatants.len(),
                destroyed = destroyed.len(),
                "combat.resolved"
            );
            report.events.push(CombatEvent {
                location,
                description,
                damages,
                combatants,
            });
        }

        let attackers: Vec<EntityId> = store
            .iter()
            .filter(|entity| entity.target.is_some())
            .map(|entity| entity.id)
            .collect();
        for attacker in attackers {
            if let Some(hit) = self.targeted_attack(store, topology, attacker) {
                report.targeted.push(hit);
            }
        }

        report
    }

    /// Resolves one explicit attack. `None` means nothing happened: no target,
    /// no attack power, friendly or unreachable target, or out of range.
    pub fn targeted_attack<S, T>(
        &mut self,
        store: &mut S,
        topology: &T,
        attacker_id: EntityId,
    ) -> Option<TargetedHit>
    where
        S: EntityStore + ?Sized,
        T: Topology + ?Sized,
    {
        let attacker = store.get(attacker_id)?;
        let target_id = attacker.target?;
        if attacker.attack <= 0.0 || attacker.is_dead() || attacker.in_transit {
            return None;
        }
        let (attack, range, owner, origin) =
            (attacker.attack, attacker.range, attacker.owner, attacker.location);

        let Some(target) = store.get(target_id) else {
            store.set_target(attacker_id, None);
            return None;
        };
        if target.owner.is_some() && target.owner == owner {
            return None;
        }
        let destination = target.location;

        let tuning = &self.config.combat;
        let distance = topology.distance(origin?, destination?)?;
        if distance > range * tuning.targeted_range_scale {
            debug!(
                target: "galaxy::combat",
                attacker = %attacker_id,
                target = %target_id,
                distance,
                "combat.targeted.out_of_range"
            );
            return None;
        }

        let variance = tuning.targeted_variance.abs();
        let damage = attack * (1.0 + self.rng.gen_range(-variance..=variance));
        let destroyed = store.damage(target_id, damage);
        if destroyed {
            store.remove(target_id);
            store.set_target(attacker_id, None);
        }
        Some(TargetedHit {
            attacker: attacker_id,
            target: target_id,
            damage,
            destroyed,
        })
    }

    /// Simulates a bounded planetary invasion. Does not mutate any store.
    pub fn resolve_invasion(
        &mut self,
        attackers: &[Entity],
        defenders: &[Entity],
        planet: &Planet,
    ) -> InvasionResult {
        invasion::simulate_invasion(
            attackers,
            defenders,
            planet,
            &self.config.combat,
            &mut self.rng,
        )
    }
}
