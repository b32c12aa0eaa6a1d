use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Block types the raid AI distinguishes. Everything else the host knows
/// about maps onto `Stone` (solid) or `Air` (passable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Air,
    Stone,
    Dirt,
    Cobblestone,
    Planks,
    Water,
    Lava,
    Fire,
    SoulFire,
    Cactus,
    SweetBerryBush,
    Cobweb,
    HoneyBlock,
    SoulSand,
    Ice,
    PackedIce,
    SlimeBlock,
    Door { open: bool },
}

impl BlockKind {
    pub fn default_hazards() -> &'static [BlockKind] {
        &[
            BlockKind::Water,
            BlockKind::Lava,
            BlockKind::Fire,
            BlockKind::SoulFire,
            BlockKind::Cactus,
            BlockKind::SweetBerryBush,
            BlockKind::Cobweb,
            BlockKind::HoneyBlock,
        ]
    }

    /// Full collision block an agent can stand on.
    pub fn is_solid(self) -> bool {
        matches!(
            self,
            BlockKind::Stone
                | BlockKind::Dirt
                | BlockKind::Cobblestone
                | BlockKind::Planks
                | BlockKind::HoneyBlock
                | BlockKind::SoulSand
                | BlockKind::Ice
                | BlockKind::PackedIce
                | BlockKind::SlimeBlock
                | BlockKind::Door { open: false }
        )
    }

    /// Blocks a body from occupying the cell. Doors never obstruct planning
    /// since raiders open them on arrival.
    pub fn obstructs(self) -> bool {
        self.is_solid() && !self.is_door()
    }

    pub fn is_liquid(self) -> bool {
        matches!(self, BlockKind::Water | BlockKind::Lava)
    }

    pub fn is_fire(self) -> bool {
        matches!(self, BlockKind::Fire | BlockKind::SoulFire)
    }

    pub fn is_harmful_plant(self) -> bool {
        matches!(self, BlockKind::Cactus | BlockKind::SweetBerryBush)
    }

    pub fn is_cobweb(self) -> bool {
        self == BlockKind::Cobweb
    }

    pub fn is_door(self) -> bool {
        matches!(self, BlockKind::Door { .. })
    }

    pub fn is_closed_door(self) -> bool {
        self == BlockKind::Door { open: false }
    }

    /// Footing that slows a walker down.
    pub fn is_difficult_terrain(self) -> bool {
        matches!(
            self,
            BlockKind::SoulSand | BlockKind::HoneyBlock | BlockKind::Ice | BlockKind::PackedIce | BlockKind::SlimeBlock
        )
    }
}

/// Immutable set of block kinds treated as dangerous or blocking. Built once
/// from configuration and shared by the pathfinder and obstacle handling.
#[derive(Clone, Debug)]
pub struct HazardSet {
    kinds: HashSet<BlockKind>,
}

impl HazardSet {
    pub fn new(kinds: &[BlockKind]) -> HazardSet {
        HazardSet {
            kinds: kinds.iter().copied().collect(),
        }
    }

    pub fn contains(&self, kind: BlockKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for HazardSet {
    fn default() -> Self {
        HazardSet::new(BlockKind::default_hazards())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doors_are_solid_but_do_not_obstruct() {
        let closed = BlockKind::Door { open: false };

        assert!(closed.is_solid());
        assert!(!closed.obstructs());
        assert!(!BlockKind::Door { open: true }.is_solid());
    }

    #[test]
    fn default_hazards_cover_liquids_fire_and_plants() {
        let hazards = HazardSet::default();

        for kind in [BlockKind::Water, BlockKind::Lava, BlockKind::SoulFire, BlockKind::Cactus, BlockKind::Cobweb, BlockKind::HoneyBlock] {
            assert!(hazards.contains(kind), "{:?} should be hazardous", kind);
        }

        assert!(!hazards.contains(BlockKind::Stone));
        assert!(!hazards.contains(BlockKind::SoulSand));
    }
}
