//! Population governance.
//!
//! Four escalating passes keep the live entity set bounded:
//!
//! 1. [`PopulationGovernor::cleanup`] removes dead, displaced and orphaned entities.
//! 2. [`PopulationGovernor::enforce_per_empire_limits`] trims empires over their cap.
//! 3. [`PopulationGovernor::aggressive_cleanup`] evicts the least important entities
//!    once the soft cap is exceeded.
//! 4. [`PopulationGovernor::enforce_hard_limit`] guarantees the hard cap.
//!
//! [`PopulationGovernor::full_cleanup`] chains all four.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::RuntimeConfig,
    entity::{EmpireId, Entity, EntityId, EntityStore},
    world::{EmpireRegistry, Topology},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Destroyed,
    LostLocation,
    OrphanedOwner,
    DefeatedOwner,
    EmpireCap,
    LowImportance,
    HardLimit,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Destroyed => "destroyed",
            RemovalReason::LostLocation => "lost_location",
            RemovalReason::OrphanedOwner => "orphaned_owner",
            RemovalReason::DefeatedOwner => "defeated_owner",
            RemovalReason::EmpireCap => "empire_cap",
            RemovalReason::LowImportance => "low_importance",
            RemovalReason::HardLimit => "hard_limit",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupSummary {
    pub removed_count: usize,
    pub reason_breakdown: BTreeMap<RemovalReason, usize>,
}

impl CleanupSummary {
    fn record(&mut self, reason: RemovalReason) {
        self.removed_count += 1;
        *self.reason_breakdown.entry(reason).or_default() += 1;
    }

    pub fn merge(&mut self, other: CleanupSummary) {
        self.removed_count += other.removed_count;
        for (reason, count) in other.reason_breakdown {
            *self.reason_breakdown.entry(reason).or_default() += count;
        }
    }

    pub fn count(&self, reason: RemovalReason) -> usize {
        self.reason_breakdown.get(&reason).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PopulationHealth {
    Ok,
    Warning,
    High,
    Critical,
}

impl PopulationHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            PopulationHealth::Ok => "OK",
            PopulationHealth::Warning => "WARNING",
            PopulationHealth::High => "HIGH",
            PopulationHealth::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationStats {
    pub total: usize,
    pub units: usize,
    pub structures: usize,
    pub dead: usize,
    pub unowned: usize,
    pub by_owner: BTreeMap<EmpireId, usize>,
    pub health: PopulationHealth,
}

/// Eviction candidate detached from the store so removal can proceed after scoring.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    id: EntityId,
    created_at: u64,
    score: f32,
}

fn oldest_first(a: &Candidate, b: &Candidate) -> Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

#[derive(Debug, Clone)]
pub struct PopulationGovernor {
    config: Arc<RuntimeConfig>,
}

impl PopulationGovernor {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Removes entities that are dead, whose planet no longer resolves, or whose
    /// owner is missing or defeated. Unowned and unlocated entities are kept.
    pub fn cleanup<S, T, E>(&self, store: &mut S, topology: &T, empires: &E) -> CleanupSummary
    where
        S: EntityStore + ?Sized,
        T: Topology + ?Sized,
        E: EmpireRegistry + ?Sized,
    {
        let doomed: Vec<(EntityId, RemovalReason)> = store
            .iter()
            .filter_map(|entity| {
                removal_reason(entity, topology, empires).map(|reason| (entity.id, reason))
            })
            .collect();

        let mut summary = CleanupSummary::default();
        for (id, reason) in doomed {
            if store.remove(id).is_some() {
                summary.record(reason);
            }
        }
        if summary.removed_count > 0 {
            info!(
                target: "galaxy::governor",
                removed = summary.removed_count,
                destroyed = summary.count(RemovalReason::Destroyed),
                lost_location = summary.count(RemovalReason::LostLocation),
                orphaned = summary.count(RemovalReason::OrphanedOwner),
                defeated = summary.count(RemovalReason::DefeatedOwner),
                "governor.cleanup.removed"
            );
        }
        summary
    }

    /// Trims every empire above `per_empire_cap`, oldest units first.
    ///
    /// Structures are considered only after all units and only when at or below
    /// the hp floor; healthy structures may leave an empire above its cap.
    pub fn enforce_per_empire_limits<S>(&self, store: &mut S) -> CleanupSummary
    where
        S: EntityStore + ?Sized,
    {
        let limits = &self.config.entity_limits;
        let mut by_owner: HashMap<EmpireId, (Vec<Candidate>, Vec<Candidate>, usize)> =
            HashMap::new();
        for entity in store.iter() {
            let Some(owner) = entity.owner else {
                continue;
            };
            let (units, weak_structures, total) = by_owner.entry(owner).or_default();
            *total += 1;
            let candidate = Candidate {
                id: entity.id,
                created_at: entity.created_at,
                score: 0.0,
            };
            if !entity.is_structure() {
                units.push(candidate);
            } else if entity.hp_fraction() <= limits.structure_hp_floor {
                weak_structures.push(candidate);
            }
        }

        let mut owners: Vec<_> = by_owner.into_iter().collect();
        owners.sort_by_key(|(owner, _)| *owner);

        let mut summary = CleanupSummary::default();
        for (owner, (mut units, mut weak_structures, total)) in owners {
            if total <= limits.per_empire_cap {
                continue;
            }
            let excess = total - limits.per_empire_cap;
            units.sort_by(oldest_first);
            weak_structures.sort_by(oldest_first);

            let mut removed = 0;
            for candidate in units.iter().chain(weak_structures.iter()).take(excess) {
                if store.remove(candidate.id).is_some() {
                    summary.record(RemovalReason::EmpireCap);
                    removed += 1;
                }
            }
            info!(
                target: "galaxy::governor",
                %owner,
                population = total,
                cap = limits.per_empire_cap,
                removed,
                "governor.empire_cap.enforced"
            );
            if removed < excess {
                warn!(
                    target: "galaxy::governor",
                    %owner,
                    remaining_excess = excess - removed,
                    "governor.empire_cap.structures_exempt"
                );
            }
        }
        summary
    }

    /// Importance used to order eviction; lower scores go first.
    pub fn importance_score(&self, entity: &Entity) -> f32 {
        let weights = &self.config.importance;
        if entity.is_structure() {
            return weights.structure_bias + entity.hp_fraction() * weights.structure_hp_weight;
        }
        let mut score = weights.unit_base
            + entity.hp_fraction() * weights.hp_weight
            + entity.attack.max(0.0) * weights.attack_weight;
        if let Some(definition) = self.config.definition(&entity.def_name) {
            score += definition.importance_bonus;
        }
        if entity.in_transit {
            score += weights.in_transit_bonus;
        }
        score
    }

    /// Evicts up to `target_removal` of the lowest scoring entities. Structures
    /// above the hp floor are never candidates.
    pub fn aggressive_cleanup<S>(&self, store: &mut S, target_removal: usize) -> CleanupSummary
    where
        S: EntityStore + ?Sized,
    {
        self.evict_lowest(store, target_removal, RemovalReason::LowImportance)
    }

    fn evict_lowest<S>(&self, store: &mut S, target: usize, reason: RemovalReason) -> CleanupSummary
    where
        S: EntityStore + ?Sized,
    {
        let mut summary = CleanupSummary::default();
        if target == 0 {
            return summary;
        }
        let floor = self.config.entity_limits.structure_hp_floor;
        let mut candidates: Vec<Candidate> = store
            .iter()
            .filter(|entity| !(entity.is_structure() && entity.hp_fraction() > floor))
            .map(|entity| Candidate {
                id: entity.id,
                created_at: entity.created_at,
                score: self.importance_score(entity),
            })
            .collect();
        candidates.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| oldest_first(a, b)));

        for candidate in candidates.iter().take(target) {
            if store.remove(candidate.id).is_some() {
                summary.record(reason);
            }
        }
        warn!(
            target: "galaxy::governor",
            requested = target,
            removed = summary.removed_count,
            remaining = store.len(),
            reason = reason.as_str(),
            "governor.aggressive_cleanup"
        );
        summary
    }

    /// Brings the population to at most `hard_cap`, whatever it takes.
    pub fn enforce_hard_limit<S>(&self, store: &mut S) -> CleanupSummary
    where
        S: EntityStore + ?Sized,
    {
        let limits = &self.config.entity_limits;
        let mut summary = CleanupSummary::default();
        if store.len() <= limits.hard_cap {
            return summary;
        }

        let batch = limits
            .cleanup_batch
            .saturating_mul(limits.hard_batch_multiplier.max(1));
        summary.merge(self.aggressive_cleanup(store, batch));

        if store.len() > limits.hard_cap {
            let excess = store.len() - limits.hard_cap;
            let mut units = Vec::new();
            let mut structures = Vec::new();
            for entity in store.iter() {
                let candidate = Candidate {
                    id: entity.id,
                    created_at: entity.created_at,
                    score: 0.0,
                };
                if entity.is_structure() {
                    structures.push(candidate);
                } else {
                    units.push(candidate);
                }
            }
            units.sort_by(oldest_first);
            structures.sort_by(oldest_first);

            let forced = units
                .iter()
                .map(|candidate| (candidate, false))
                .chain(structures.iter().map(|candidate| (candidate, true)))
                .take(excess);
            let mut evicted_structures = 0;
            for (candidate, is_structure) in forced {
                if store.remove(candidate.id).is_some() {
                    summary.record(RemovalReason::HardLimit);
                    if is_structure {
                        evicted_structures += 1;
                    }
                }
            }
            if evicted_structures > 0 {
                error!(
                    target: "galaxy::governor",
                    evicted_structures,
                    "governor.hard_limit.structures_evicted"
                );
            }
        }

        error!(
            target: "galaxy::governor",
            removed = summary.removed_count,
            population = store.len(),
            hard_cap = limits.hard_cap,
            "governor.hard_limit.enforced"
        );
        summary
    }

    /// Runs every pass in order and returns the merged summary.
    pub fn full_cleanup<S, T, E>(&self, store: &mut S, topology: &T, empires: &E) -> CleanupSummary
    where
        S: EntityStore + ?Sized,
        T: Topology + ?Sized,
        E: EmpireRegistry + ?Sized,
    {
        let limits = &self.config.entity_limits;
        let mut summary = self.cleanup(store, topology, empires);
        summary.merge(self.enforce_per_empire_limits(store));
        if store.len() > limits.soft_cap {
            summary.merge(self.aggressive_cleanup(store, limits.cleanup_batch));
        }
        if store.len() > limits.hard_cap {
            summary.merge(self.enforce_hard_limit(store));
        }
        info!(
            target: "galaxy::governor",
            removed = summary.removed_count,
            population = store.len(),
            "governor.full_cleanup"
        );
        summary
    }

    pub fn health(&self, total: usize) -> PopulationHealth {
        let limits = &self.config.entity_limits;
        if total >= limits.hard_cap {
            PopulationHealth::Critical
        } else if total >= limits.soft_cap {
            PopulationHealth::High
        } else if total >= limits.warning_threshold {
            PopulationHealth::Warning
        } else {
            PopulationHealth::Ok
        }
    }

    pub fn stats<S>(&self, store: &S) -> PopulationStats
    where
        S: EntityStore + ?Sized,
    {
        let mut stats = PopulationStats {
            total: 0,
            units: 0,
            structures: 0,
            dead: 0,
            unowned: 0,
            by_owner: BTreeMap::new(),
            health: PopulationHealth::Ok,
        };
        for entity in store.iter() {
            stats.total += 1;
            if entity.is_structure() {
                stats.structures += 1;
            } else {
                stats.units += 1;
            }
            if entity.is_dead() {
                stats.dead += 1;
            }
            match entity.owner {
                Some(owner) => *stats.by_owner.entry(owner).or_default() += 1,
                None => stats.unowned += 1,
            }
        }
        stats.health = self.health(stats.total);
        stats
    }
}

fn removal_reason<T, E>(entity: &Entity, topology: &T, empires: &E) -> Option<RemovalReason>
where
    T: Topology + ?Sized,
    E: EmpireRegistry + ?Sized,
{
    if entity.is_dead() {
        return Some(RemovalReason::Destroyed);
    }
    if let Some(location) = entity.location {
        if topology.planet(location).is_none() {
            return Some(RemovalReason::LostLocation);
        }
    }
    if let Some(owner) = entity.owner {
        match empires.empire(owner) {
            None => return Some(RemovalReason::OrphanedOwner),
            Some(empire) if empire.defeated => return Some(RemovalReason::DefeatedOwner),
            Some(_) => {}
        }
    }
    None
}
