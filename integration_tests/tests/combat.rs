mod common;

use std::collections::HashSet;
use std::sync::Arc;

use galaxy_core::demo::{demo_world, homeworld};
use galaxy_core::{
    CombatResolver, EmpireId, Entity, EntityArena, EntityId, EntitySpec, EntityStore,
    InvasionOutcome, Planet, RuntimeConfig, Topology,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn resolver(seed: u64) -> CombatResolver {
    CombatResolver::with_seed(Arc::new(RuntimeConfig::builtin()), seed)
}

fn contested_planet() -> Planet {
    demo_world()
        .star_map
        .planet(homeworld(EmpireId(2)))
        .cloned()
        .expect("demo homeworld")
}

fn squad(
    arena: &mut EntityArena,
    owner: EmpireId,
    count: usize,
    hp: f32,
    attack: f32,
) -> Vec<Entity> {
    let at = homeworld(EmpireId(2));
    (0..count)
        .map(|_| {
            let spec = EntitySpec::unit("fighter", owner, at).with_stats(hp, attack);
            let id = arena.insert(spec, 0);
            arena.get(id).cloned().expect("inserted")
        })
        .collect()
}

#[test]
fn area_combat_never_touches_removed_entities() {
    for seed in 0..25u64 {
        let mut world = demo_world();
        common::populate(&mut world, seed, 400);
        let mut resolver = resolver(seed);

        let report = resolver.resolve_all_combat(&mut world.entities, &world.star_map);
        let mut destroyed: HashSet<EntityId> = HashSet::new();
        for event in &report.events {
            assert!(event.combatants.len() > 1);
            for damage in &event.damages {
                assert!(
                    !destroyed.contains(&damage.target),
                    "seed {seed}: {} damaged after destruction",
                    damage.target
                );
                if damage.destroyed {
                    destroyed.insert(damage.target);
                }
            }
        }
        for id in &destroyed {
            assert!(world.entities.get(*id).is_none());
        }
        assert!(world.entities.iter().all(|entity| !entity.is_dead()));
        assert_eq!(report.destroyed_count(), destroyed.len());
    }
}

#[test]
fn empty_defence_is_captured_without_rounds() {
    let mut arena = EntityArena::new();
    let attackers = squad(&mut arena, EmpireId(1), 3, 100.0, 10.0);
    let planet = contested_planet();

    let result = resolver(1).resolve_invasion(&attackers, &[], &planet);
    assert!(result.conquered);
    assert_eq!(result.attacker_losses, 0);
    assert_eq!(result.defender_losses, 0);
    assert_eq!(result.rounds, 0);
    assert!(result.battle_log.iter().all(|line| !line.starts_with("Round")));

    insta::assert_json_snapshot!(result, @r###"
    {
      "conquered": true,
      "outcome": "conquered",
      "rounds": 0,
      "attacker_losses": 0,
      "defender_losses": 0,
      "destroyed_attackers": [],
      "destroyed_defenders": [],
      "survivor_damage": [],
      "battle_log": [
        "Kepler I was undefended and captured without a fight"
      ]
    }
    "###);
}

#[test]
fn invasions_never_exceed_ten_rounds() {
    let planet = contested_planet();
    let mut rng = SmallRng::seed_from_u64(99);
    for seed in 0..40u64 {
        let mut arena = EntityArena::new();
        let attackers = squad(
            &mut arena,
            EmpireId(1),
            rng.gen_range(1..12),
            rng.gen_range(50.0..5_000.0),
            rng.gen_range(0.0..30.0),
        );
        let defenders = squad(
            &mut arena,
            EmpireId(2),
            rng.gen_range(1..12),
            rng.gen_range(50.0..5_000.0),
            rng.gen_range(0.0..30.0),
        );
        let result = resolver(seed).resolve_invasion(&attackers, &defenders, &planet);
        assert!(result.rounds <= 10, "seed {seed}: {} rounds", result.rounds);
        let round_lines = result
            .battle_log
            .iter()
            .filter(|line| line.starts_with("Round "))
            .count();
        assert_eq!(round_lines as u32, result.rounds);
        assert_eq!(result.conquered, result.outcome == InvasionOutcome::Conquered);
    }
}

#[test]
fn hundred_attack_overwhelms_lone_defender() {
    let planet = contested_planet();
    for seed in 0..30u64 {
        let mut arena = EntityArena::new();
        let attackers = squad(&mut arena, EmpireId(1), 10, 100.0, 10.0);
        let defenders = squad(&mut arena, EmpireId(2), 1, 50.0, 10.0);
        let result = resolver(seed).resolve_invasion(&attackers, &defenders, &planet);
        assert!(result.conquered, "seed {seed}");
        assert_eq!(result.rounds, 1);
        assert_eq!(result.defender_losses, 1);
        assert_eq!(result.attacker_losses, 0);
    }
}

#[test]
fn same_seed_replays_identically() {
    let planet = contested_planet();
    let mut arena = EntityArena::new();
    let attackers = squad(&mut arena, EmpireId(1), 4, 120.0, 8.0);
    let defenders = squad(&mut arena, EmpireId(2), 4, 120.0, 8.0);

    let first = resolver(5).resolve_invasion(&attackers, &defenders, &planet);
    let second = resolver(5).resolve_invasion(&attackers, &defenders, &planet);
    assert_eq!(first, second);
}

#[test]
fn demo_world_topology_resolves_distances() {
    let world = demo_world();
    let home = homeworld(EmpireId(1));
    assert_eq!(world.star_map.distance(home, home), Some(0.0));
    assert!(world.star_map.distance(home, homeworld(EmpireId(3))).is_some_and(|d| d > 0.0));
}
