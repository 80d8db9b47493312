// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity identifiers, pair packing and location metadata.
//!
//! An [`EntityId`] is a 64-bit handle: the low 32 bits carry the slot id,
//! 28 bits carry the generation, and the top bits carry flags. A pair handle
//! packs a relation id and a target id into one value with the PAIR flag set;
//! the reserved [`EntityId::WILDCARD`] id is recognized in either position.

/// Number of bits in the id field
pub const ID_BITS: u32 = 32;

/// Number of bits in the generation field
pub const GEN_BITS: u32 = 28;

/// Mask over the id field. Doubles as the free-list tail sentinel and the
/// capacity limit: this id value is never dispensed.
pub const ID_MASK: u32 = u32::MAX;

/// Mask over the generation field
pub const GEN_MASK: u32 = (1 << GEN_BITS) - 1;

/// Pair flag bit
const PAIR_FLAG: u64 = 1 << 63;

/// Reserved id matching any relation or target in a pair. Fits in the
/// 28-bit target slot as well as the 32-bit relation slot.
pub const WILDCARD_ID: u32 = GEN_MASK;

/// 64-bit entity handle
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The null entity
    pub const NULL: EntityId = EntityId(u64::MAX);

    /// Matches any entity in a pair position
    pub const WILDCARD: EntityId = EntityId(WILDCARD_ID as u64);

    /// Construct from slot id and generation
    pub const fn new(id: u32, generation: u32) -> Self {
        EntityId((id as u64) | (((generation & GEN_MASK) as u64) << ID_BITS))
    }

    /// Pack a relation and a target into a pair handle.
    ///
    /// Generations are dropped; the target id is truncated to the generation
    /// field width.
    pub const fn pair(relation: EntityId, target: EntityId) -> Self {
        EntityId(
            PAIR_FLAG
                | (relation.0 & ID_MASK as u64)
                | (((target.0 & ID_MASK as u64) & GEN_MASK as u64) << ID_BITS),
        )
    }

    /// Slot id field
    pub const fn id(self) -> u32 {
        (self.0 & ID_MASK as u64) as u32
    }

    /// Generation field
    pub const fn generation(self) -> u32 {
        ((self.0 >> ID_BITS) as u32) & GEN_MASK
    }

    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    pub const fn is_pair(self) -> bool {
        self.0 & PAIR_FLAG != 0 && !self.is_null()
    }

    /// Relation id of a pair handle
    pub const fn relation_id(self) -> u32 {
        debug_assert!(self.is_pair());
        self.id()
    }

    /// Target id of a pair handle
    pub const fn target_id(self) -> u32 {
        debug_assert!(self.is_pair());
        self.generation()
    }

    /// Unpack a pair into (relation id, target id)
    pub const fn unpack_pair(self) -> (u32, u32) {
        (self.relation_id(), self.target_id())
    }

    /// True for pairs with a wildcard in either position
    pub const fn has_wildcard(self) -> bool {
        self.is_pair() && (self.relation_id() == WILDCARD_ID || self.target_id() == WILDCARD_ID)
    }

    /// Raw 64-bit value
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        EntityId(bits)
    }
}

impl std::fmt::Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "EntityId(null)")
        } else if self.is_pair() {
            write!(f, "EntityId({}, {})", self.relation_id(), self.target_id())
        } else {
            write!(f, "EntityId({}v{})", self.id(), self.generation())
        }
    }
}

/// Universal identifier stored in signatures and query terms: either a
/// component id assigned by the descriptor registry or an entity pair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Default for Id {
    fn default() -> Self {
        Id::from_component(0)
    }
}

impl Id {
    pub const fn from_component(index: u32) -> Self {
        Id(index as u64)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Id(bits)
    }

    pub const fn from_pair(pair: EntityId) -> Self {
        debug_assert!(pair.is_pair());
        Id(pair.to_bits())
    }

    pub const fn is_pair(self) -> bool {
        EntityId::from_bits(self.0).is_pair()
    }

    pub const fn as_pair(self) -> EntityId {
        EntityId::from_bits(self.0)
    }

    /// Component index for non-pair ids
    pub const fn component_index(self) -> u32 {
        debug_assert!(!self.is_pair());
        self.0 as u32
    }

    pub const fn has_wildcard(self) -> bool {
        self.as_pair().has_wildcard()
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Pair-aware match: plain ids compare by value, pair ids honor
    /// wildcards in either position.
    pub fn matches(self, other: Id) -> bool {
        if self == other {
            return true;
        }
        if !self.is_pair() || !other.is_pair() {
            return false;
        }
        let (ar, at) = self.as_pair().unpack_pair();
        let (br, bt) = other.as_pair().unpack_pair();
        (ar == br || ar == WILDCARD_ID || br == WILDCARD_ID)
            && (at == bt || at == WILDCARD_ID || bt == WILDCARD_ID)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_pair() {
            let (r, t) = self.as_pair().unpack_pair();
            write!(f, "Id(pair {r}, {t})")
        } else {
            write!(f, "Id({})", self.0)
        }
    }
}

/// Entity location and bookkeeping, stored in the implicit free list.
///
/// While the slot is live, `id` holds the slot's own index; while the slot is
/// on the free chain, `id` is repurposed as the next-free link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRecord {
    pub(crate) id: u32,
    pub(crate) generation: u32,
    pub(crate) archetype: u32,
    pub(crate) chunk: u32,
    pub(crate) row: u32,
    pub(crate) disabled: bool,
}

impl EntityRecord {
    /// Sentinel for "not placed in any archetype"
    pub(crate) const UNPLACED: u32 = u32::MAX;

    pub(crate) fn new(id: u32, generation: u32) -> Self {
        Self {
            id,
            generation,
            archetype: Self::UNPLACED,
            chunk: 0,
            row: 0,
            disabled: false,
        }
    }

    pub(crate) fn clear_placement(&mut self) {
        self.archetype = Self::UNPLACED;
        self.chunk = 0;
        self.row = 0;
        self.disabled = false;
    }
}
