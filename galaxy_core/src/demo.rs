//! Small seeded galaxy used by the server binary, benches and tests.

use crate::entity::{EmpireId, PlanetId};
use crate::world::{
    Empire, EmpireRoster, Planet, StarMap, StarSystem, SystemId, TerrainEffects, World,
};

const EMPIRE_NAMES: [&str; 3] = ["Aurora Compact", "Vellan Hegemony", "Free Drift"];
const SYSTEM_NAMES: [&str; 4] = ["Sol", "Kepler", "Vega", "Tau Ceti"];

/// Builds a world with three empires and four star systems of two planets
/// each. Planet `n` of system `s` has id `s * 10 + n`; the first planet of the
/// first three systems is a homeworld owned by the matching empire.
pub fn demo_world() -> World {
    let mut star_map = StarMap::new();
    for (index, name) in SYSTEM_NAMES.iter().enumerate() {
        let system = SystemId(index as u32 + 1);
        star_map.add_system(StarSystem {
            id: system,
            name: (*name).to_string(),
            position: (index as f32 * 4.0, (index % 2) as f32 * 3.0),
            terrain: TerrainEffects {
                defense_bonus: if index == 3 { 0.25 } else { 0.0 },
            },
        });
        for slot in 1..=2u32 {
            let owner = (slot == 1 && index < EMPIRE_NAMES.len())
                .then_some(EmpireId(index as u32 + 1));
            star_map.add_planet(Planet {
                id: demo_planet(system, slot),
                name: format!("{name} {}", roman(slot)),
                system,
                owner,
            });
        }
    }

    let empires = EmpireRoster::new(EMPIRE_NAMES.iter().enumerate().map(|(index, name)| {
        Empire {
            id: EmpireId(index as u32 + 1),
            name: (*name).to_string(),
            defeated: false,
        }
    }));

    World::new(star_map, empires)
}

pub fn demo_planet(system: SystemId, slot: u32) -> PlanetId {
    PlanetId(system.0 * 10 + slot)
}

pub fn homeworld(empire: EmpireId) -> PlanetId {
    demo_planet(SystemId(empire.0), 1)
}

fn roman(slot: u32) -> &'static str {
    match slot {
        1 => "I",
        2 => "II",
        _ => "III",
    }
}
