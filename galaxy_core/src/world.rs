//! Topology and empire collaborators, plus the in-memory [`World`] bundle the
//! scheduler mutates from the simulation thread.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{EmpireId, EntityArena, PlanetId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub u32);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Planet {
    pub id: PlanetId,
    pub name: String,
    pub system: SystemId,
    pub owner: Option<EmpireId>,
}

/// Terrain-derived combat modifiers for a star system.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TerrainEffects {
    /// Fractional reduction of damage received by entities in the system.
    pub defense_bonus: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarSystem {
    pub id: SystemId,
    pub name: String,
    pub position: (f32, f32),
    #[serde(default)]
    pub terrain: TerrainEffects,
}

/// Read access to universe topology.
pub trait Topology {
    fn planet(&self, id: PlanetId) -> Option<&Planet>;

    /// Distance between two planets, `None` when either does not resolve.
    fn distance(&self, a: PlanetId, b: PlanetId) -> Option<f32>;

    fn terrain_effects(&self, system: SystemId) -> TerrainEffects;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Empire {
    pub id: EmpireId,
    pub name: String,
    pub defeated: bool,
}

pub trait EmpireRegistry {
    fn empire(&self, id: EmpireId) -> Option<&Empire>;

    fn empires(&self) -> Box<dyn Iterator<Item = &Empire> + '_>;

    /// Present and not defeated.
    fn is_active(&self, id: EmpireId) -> bool {
        self.empire(id).is_some_and(|empire| !empire.defeated)
    }
}

/// In-memory topology backed by hash maps.
#[derive(Debug, Clone, Default)]
pub struct StarMap {
    systems: HashMap<SystemId, StarSystem>,
    planets: HashMap<PlanetId, Planet>,
}

impl StarMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system(&mut self, system: StarSystem) {
        self.systems.insert(system.id, system);
    }

    pub fn add_planet(&mut self, planet: Planet) {
        self.planets.insert(planet.id, planet);
    }

    pub fn set_owner(&mut self, id: PlanetId, owner: Option<EmpireId>) -> bool {
        match self.planets.get_mut(&id) {
            Some(planet) => {
                planet.owner = owner;
                true
            }
            None => false,
        }
    }

    pub fn planet_count(&self) -> usize {
        self.planets.len()
    }
}

impl Topology for StarMap {
    fn planet(&self, id: PlanetId) -> Option<&Planet> {
        self.planets.get(&id)
    }

    fn distance(&self, a: PlanetId, b: PlanetId) -> Option<f32> {
        let first = self.planets.get(&a)?;
        let second = self.planets.get(&b)?;
        if first.system == second.system {
            return Some(0.0);
        }
        let (ax, ay) = self.systems.get(&first.system)?.position;
        let (bx, by) = self.systems.get(&second.system)?.position;
        Some(((ax - bx).powi(2) + (ay - by).powi(2)).sqrt())
    }

    fn terrain_effects(&self, system: SystemId) -> TerrainEffects {
        self.systems
            .get(&system)
            .map(|system| system.terrain)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmpireRoster {
    empires: BTreeMap<EmpireId, Empire>,
}

impl EmpireRoster {
    pub fn new(empires: impl IntoIterator<Item = Empire>) -> Self {
        Self {
            empires: empires.into_iter().map(|empire| (empire.id, empire)).collect(),
        }
    }

    pub fn insert(&mut self, empire: Empire) {
        self.empires.insert(empire.id, empire);
    }

    pub fn mark_defeated(&mut self, id: EmpireId) -> bool {
        match self.empires.get_mut(&id) {
            Some(empire) => {
                empire.defeated = true;
                true
            }
            None => false,
        }
    }
}

impl EmpireRegistry for EmpireRoster {
    fn empire(&self, id: EmpireId) -> Option<&Empire> {
        self.empires.get(&id)
    }

    fn empires(&self) -> Box<dyn Iterator<Item = &Empire> + '_> {
        Box::new(self.empires.values())
    }
}

/// Everything the simulation thread owns and mutates in place.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub entities: EntityArena,
    pub star_map: StarMap,
    pub empires: EmpireRoster,
}

impl World {
    pub fn new(star_map: StarMap, empires: EmpireRoster) -> Self {
        Self {
            entities: EntityArena::new(),
            star_map,
            empires,
        }
    }
}
