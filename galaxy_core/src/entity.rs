use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a simulated unit or structure. Never reused within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an empire participating in the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmpireId(pub u32);

impl fmt::Display for EmpireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a planet; entity locations are always planets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanetId(pub u32);

impl fmt::Display for PlanetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Unit,
    Structure,
}

/// Canonical entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub def_name: String,
    pub kind: EntityKind,
    pub owner: Option<EmpireId>,
    pub location: Option<PlanetId>,
    pub hp: f32,
    pub max_hp: f32,
    pub attack: f32,
    pub range: f32,
    pub created_at: u64,
    pub target: Option<EntityId>,
    pub in_transit: bool,
}

impl Entity {
    pub fn is_structure(&self) -> bool {
        self.kind == EntityKind::Structure
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0.0
    }

    /// Remaining hp as a fraction of max hp, clamped to `[0, 1]`.
    pub fn hp_fraction(&self) -> f32 {
        if self.max_hp <= 0.0 {
            return 0.0;
        }
        (self.hp / self.max_hp).clamp(0.0, 1.0)
    }
}

/// Creation request for a new entity. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub def_name: String,
    pub kind: EntityKind,
    pub owner: Option<EmpireId>,
    pub location: Option<PlanetId>,
    pub max_hp: f32,
    pub attack: f32,
    #[serde(default)]
    pub range: f32,
    #[serde(default)]
    pub in_transit: bool,
}

impl EntitySpec {
    pub fn unit(def_name: impl Into<String>, owner: EmpireId, location: PlanetId) -> Self {
        Self {
            def_name: def_name.into(),
            kind: EntityKind::Unit,
            owner: Some(owner),
            location: Some(location),
            max_hp: 100.0,
            attack: 10.0,
            range: 1.0,
            in_transit: false,
        }
    }

    pub fn structure(def_name: impl Into<String>, owner: EmpireId, location: PlanetId) -> Self {
        Self {
            def_name: def_name.into(),
            kind: EntityKind::Structure,
            owner: Some(owner),
            location: Some(location),
            max_hp: 500.0,
            attack: 0.0,
            range: 0.0,
            in_transit: false,
        }
    }

    pub fn with_stats(mut self, max_hp: f32, attack: f32) -> Self {
        self.max_hp = max_hp;
        self.attack = attack;
        self
    }

    pub fn in_transit(mut self, in_transit: bool) -> Self {
        self.in_transit = in_transit;
        self
    }
}

/// Access to canonical entity records, consumed by combat and governance.
pub trait EntityStore {
    fn iter(&self) -> Box<dyn Iterator<Item = &Entity> + '_>;

    fn get(&self, id: EntityId) -> Option<&Entity>;

    /// Applies damage, clamping hp at zero. Returns `true` once the entity is destroyed.
    fn damage(&mut self, id: EntityId, amount: f32) -> bool;

    fn remove(&mut self, id: EntityId) -> Option<Entity>;

    fn set_target(&mut self, id: EntityId, target: Option<EntityId>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense entity storage with an id index.
///
/// Removal uses `swap_remove`: the last record moves into the freed slot and
/// its index entry is patched. Slot indices are therefore only valid until the
/// next removal; callers hold [`EntityId`]s, never indices.
#[derive(Debug, Clone, Default)]
pub struct EntityArena {
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
    next_id: u64,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entities: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            next_id: 0,
        }
    }

    pub fn insert(&mut self, spec: EntitySpec, created_at: u64) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        let entity = Entity {
            id,
            def_name: spec.def_name,
            kind: spec.kind,
            owner: spec.owner,
            location: spec.location,
            hp: spec.max_hp,
            max_hp: spec.max_hp,
            attack: spec.attack,
            range: spec.range,
            created_at,
            target: None,
            in_transit: spec.in_transit,
        };
        self.index.insert(id, self.entities.len());
        self.entities.push(entity);
        id
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let slot = *self.index.get(&id)?;
        self.entities.get_mut(slot)
    }
}

impl EntityStore for EntityArena {
    fn iter(&self) -> Box<dyn Iterator<Item = &Entity> + '_> {
        Box::new(self.entities.iter())
    }

    fn get(&self, id: EntityId) -> Option<&Entity> {
        let slot = *self.index.get(&id)?;
        self.entities.get(slot)
    }

    fn damage(&mut self, id: EntityId, amount: f32) -> bool {
        let Some(entity) = self.get_mut(id) else {
            return false;
        };
        if amount > 0.0 {
            entity.hp = (entity.hp - amount).max(0.0);
        }
        entity.is_dead()
    }

    fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.index.remove(&id)?;
        let removed = self.entities.swap_remove(slot);
        if let Some(moved) = self.entities.get(slot) {
            self.index.insert(moved.id, slot);
        }
        Some(removed)
    }

    fn set_target(&mut self, id: EntityId, target: Option<EntityId>) {
        if let Some(entity) = self.get_mut(id) {
            entity.target = target;
        }
    }

    fn len(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_remove_keeps_index_consistent() {
        let mut arena = EntityArena::new();
        let a = arena.insert(EntitySpec::unit("scout", EmpireId(1), PlanetId(1)), 0);
        let b = arena.insert(EntitySpec::unit("scout", EmpireId(1), PlanetId(1)), 1);
        let c = arena.insert(EntitySpec::unit("scout", EmpireId(2), PlanetId(2)), 2);

        assert!(arena.remove(a).is_some());
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(c).map(|e| e.id), Some(c));
        assert_eq!(arena.get(b).map(|e| e.id), Some(b));
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut arena = EntityArena::new();
        let first = arena.insert(EntitySpec::unit("scout", EmpireId(1), PlanetId(1)), 0);
        arena.remove(first);
        let second = arena.insert(EntitySpec::unit("scout", EmpireId(1), PlanetId(1)), 0);
        assert_ne!(first, second);
    }

    #[test]
    fn damage_clamps_at_zero() {
        let mut arena = EntityArena::new();
        let id = arena.insert(
            EntitySpec::unit("scout", EmpireId(1), PlanetId(1)).with_stats(30.0, 5.0),
            0,
        );
        assert!(!arena.damage(id, 10.0));
        assert!(arena.damage(id, 500.0));
        assert_eq!(arena.get(id).map(|e| e.hp), Some(0.0));
        assert!(!arena.damage(EntityId(999), 10.0));
    }
}
