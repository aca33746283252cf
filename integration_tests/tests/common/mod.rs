#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use galaxy_core::demo::{demo_planet, demo_world};
use galaxy_core::{
    EmpireId, EntitySpec, EntityStore, PlanetId, RuntimeConfig, Simulation, SystemId, World,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

static INIT: Once = Once::new();

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_runtime_config.json")
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture_path();

        debug_assert!(
            config_path.exists(),
            "missing test runtime config at {}",
            config_path.display()
        );

        std::env::set_var("RUNTIME_CONFIG_PATH", &config_path);
    });
}

/// Small caps so population properties run quickly.
pub fn test_config() -> Arc<RuntimeConfig> {
    let config = RuntimeConfig::from_file(&fixture_path()).expect("fixture config parses");
    Arc::new(config)
}

pub fn simulation(config: Arc<RuntimeConfig>) -> Simulation {
    Simulation::new(config, demo_world())
}

pub fn random_planet(rng: &mut SmallRng) -> PlanetId {
    demo_planet(SystemId(rng.gen_range(1..=4)), rng.gen_range(1..=2))
}

/// Fills `world` with `count` located, owned entities: mostly units, some
/// structures, a share of them wounded. Creation times ascend.
pub fn populate(world: &mut World, seed: u64, count: usize) {
    let mut rng = SmallRng::seed_from_u64(seed);
    for created_at in 0..count as u64 {
        let owner = EmpireId(rng.gen_range(1..=3));
        let planet = random_planet(&mut rng);
        let spec = if rng.gen_bool(0.2) {
            EntitySpec::structure("defense_platform", owner, planet)
        } else {
            EntitySpec::unit("fighter", owner, planet).with_stats(100.0, rng.gen_range(1.0..20.0))
        };
        let id = world.entities.insert(spec, created_at);
        if rng.gen_bool(0.3) {
            let max_hp = world.entities.get(id).map(|e| e.max_hp).unwrap_or(0.0);
            world.entities.damage(id, max_hp * rng.gen_range(0.1..0.9));
        }
    }
}
