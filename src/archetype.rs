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

//! Archetype: the chunk pool for one component signature, plus the
//! add/remove edges linking it to neighbor archetypes.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::chunk::Chunk;
use crate::component::{ComponentDescriptor, ComponentId, ComponentKind, KIND_COUNT};
use crate::entity::Id;
use crate::entity_list::EntityList;
use crate::layout::ChunkLayout;
use crate::registry;
use crate::utils::{hash_combine, hash_sequence};

/// Stable archetype identifier: index into the world's archetype list
pub type ArchetypeId = u32;

/// The root archetype (empty signature) is always registered first
pub const ROOT_ARCHETYPE: ArchetypeId = 0;

/// Sentinel for "no archetype"
pub const INVALID_ARCHETYPE: ArchetypeId = u32::MAX;

/// Sorted set of signature identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    ids: SmallVec<[Id; 8]>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(mut ids: SmallVec<[Id; 8]>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Signature { ids }
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Wildcard-aware membership test
    pub fn contains_match(&self, id: Id) -> bool {
        if !id.is_pair() || !id.has_wildcard() {
            return self.contains(id);
        }
        self.ids.iter().any(|&sig_id| id.matches(sig_id))
    }

    /// Copy of this signature with `id` inserted
    pub fn with(&self, id: Id) -> Signature {
        debug_assert!(!self.contains(id));
        let pos = self.ids.binary_search(&id).unwrap_err();
        let mut ids = self.ids.clone();
        ids.insert(pos, id);
        Signature { ids }
    }

    /// Copy of this signature with `id` removed
    pub fn without(&self, id: Id) -> Signature {
        debug_assert!(self.contains(id));
        let pos = self.ids.binary_search(&id).unwrap();
        let mut ids = self.ids.clone();
        ids.remove(pos);
        Signature { ids }
    }

    pub fn hash64(&self) -> u64 {
        hash_sequence(self.ids.iter().map(|id| id.to_bits()))
    }
}

/// Graph edges to archetypes one component away.
///
/// The root archetype stores no edges: its neighbor set would grow with
/// every registered component, and mutations from the root fall back to the
/// world's archetype map.
#[derive(Debug, Default)]
pub struct Edges {
    add: [FxHashMap<Id, ArchetypeId>; KIND_COUNT],
    remove: [FxHashMap<Id, ArchetypeId>; KIND_COUNT],
}

impl Edges {
    /// Record `this --add(id)--> dst`
    pub fn add_edge_right(&mut self, kind: ComponentKind, id: Id, dst: ArchetypeId) {
        let prev = self.add[kind as usize].insert(id, dst);
        debug_assert!(prev.is_none(), "add edge already recorded for {id:?}");
    }

    /// Record `this --remove(id)--> dst`
    pub fn add_edge_left(&mut self, kind: ComponentKind, id: Id, dst: ArchetypeId) {
        let prev = self.remove[kind as usize].insert(id, dst);
        debug_assert!(prev.is_none(), "remove edge already recorded for {id:?}");
    }

    pub fn find_edge_right(&self, kind: ComponentKind, id: Id) -> Option<ArchetypeId> {
        self.add[kind as usize].get(&id).copied()
    }

    pub fn find_edge_left(&self, kind: ComponentKind, id: Id) -> Option<ArchetypeId> {
        self.remove[kind as usize].get(&id).copied()
    }
}

/// Chunk pool for one (generic signature, unique signature) pair
pub struct Archetype {
    id: ArchetypeId,
    hash: u64,
    generic_sig: Signature,
    unique_sig: Signature,
    layout: Arc<ChunkLayout>,
    chunks: Vec<Chunk>,
    pub(crate) edges: Edges,
    defrag_cursor: u32,
}

impl Archetype {
    /// Create an archetype for the given signatures. Sized components are
    /// resolved through the registry; pair ids are presence-only tags.
    pub(crate) fn new(id: ArchetypeId, generic_sig: Signature, unique_sig: Signature) -> Archetype {
        let resolve = |ids: &[Id]| -> Vec<(Id, &'static ComponentDescriptor)> {
            ids.iter()
                .filter(|id| !id.is_pair())
                .map(|&sig_id| {
                    let desc = registry()
                        .by_id(ComponentId(sig_id.component_index()))
                        .expect("signature id without a registered descriptor");
                    (sig_id, desc)
                })
                .collect()
        };
        let generic_sized = resolve(generic_sig.ids());
        let unique_sized = resolve(unique_sig.ids());
        let layout = Arc::new(ChunkLayout::compute(&generic_sized, &unique_sized));
        let hash = hash_combine(generic_sig.hash64(), unique_sig.hash64());

        Archetype {
            id,
            hash,
            generic_sig,
            unique_sig,
            layout,
            chunks: Vec::new(),
            edges: Edges::default(),
            defrag_cursor: 0,
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn generic_signature(&self) -> &Signature {
        &self.generic_sig
    }

    pub fn unique_signature(&self) -> &Signature {
        &self.unique_sig
    }

    pub fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    pub fn chunk(&self, index: u32) -> &Chunk {
        &self.chunks[index as usize]
    }

    pub(crate) fn chunk_mut(&mut self, index: u32) -> &mut Chunk {
        &mut self.chunks[index as usize]
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Live rows across all chunks
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(|c| c.size() as usize).sum()
    }

    /// Membership across both signatures
    pub fn has_id(&self, id: Id) -> bool {
        self.generic_sig.contains(id) || self.unique_sig.contains(id)
    }

    /// Wildcard-aware membership across both signatures
    pub fn matches_id(&self, id: Id) -> bool {
        self.generic_sig.contains_match(id) || self.unique_sig.contains_match(id)
    }

    /// First chunk that can accept a row, allocating one when every chunk
    /// is full or locked.
    pub(crate) fn find_or_create_free_chunk(&mut self) -> u32 {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if !chunk.is_full() && !chunk.is_locked() {
                return i as u32;
            }
        }
        let index = self.chunks.len() as u32;
        self.chunks
            .push(Chunk::new(self.layout.clone(), self.id, index));
        index
    }

    /// Drop an empty chunk whose death countdown has elapsed. The chunk that
    /// takes its list slot gets its index and row records patched.
    pub(crate) fn remove_chunk(&mut self, index: u32, entities: &mut EntityList) {
        let idx = index as usize;
        debug_assert!(self.chunks[idx].is_empty(), "removing a non-empty chunk");
        debug_assert!(!self.chunks[idx].is_locked());

        self.chunks.swap_remove(idx);
        if idx < self.chunks.len() {
            self.chunks[idx].set_index(index);
            for row in 0..self.chunks[idx].size() {
                let entity = self.chunks[idx].row_entity(row);
                entities.record_mut(entity.id()).chunk = index;
            }
        }
        if (self.defrag_cursor as usize) >= self.chunks.len() {
            self.defrag_cursor = 0;
        }
    }

    /// One defragmentation step: migrate up to `max_rows` rows from
    /// tail-most chunks into head-most free space. Returns rows moved.
    pub(crate) fn defragment(
        &mut self,
        max_rows: u32,
        entities: &mut EntityList,
        world_version: u32,
    ) -> u32 {
        if self.chunks.len() < 2 {
            return 0;
        }

        let mut moved = 0;
        let mut dst = self.defrag_cursor as usize;
        if dst >= self.chunks.len() {
            dst = 0;
        }

        while moved < max_rows {
            while dst < self.chunks.len()
                && (self.chunks[dst].is_full() || self.chunks[dst].is_locked())
            {
                dst += 1;
            }
            let src = self
                .chunks
                .iter()
                .enumerate()
                .rev()
                .find(|(i, c)| *i > dst && !c.is_empty() && !c.is_locked())
                .map(|(i, _)| i);
            let src = match src {
                Some(s) => s,
                None => break,
            };
            if dst >= self.chunks.len() {
                break;
            }

            self.move_tail_row(src, dst, entities, world_version);
            moved += 1;
        }

        self.defrag_cursor = dst.min(self.chunks.len().saturating_sub(1)) as u32;
        moved
    }

    /// Move the tail row of `src` into `dst`, preserving its enabled state.
    /// The emptied source chunk starts its death countdown.
    fn move_tail_row(
        &mut self,
        src_idx: usize,
        dst_idx: usize,
        entities: &mut EntityList,
        world_version: u32,
    ) {
        debug_assert_ne!(src_idx, dst_idx);
        let (src, dst) = if src_idx < dst_idx {
            let (left, right) = self.chunks.split_at_mut(dst_idx);
            (&mut left[src_idx], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(src_idx);
            (&mut right[0], &mut left[dst_idx])
        };

        let src_row = src.size() - 1;
        let entity = src.row_entity(src_row);
        let was_disabled = src_row < src.size_disabled();

        let dst_row = dst.add_row(entity, world_version, true);
        for col in 0..dst.layout().columns.len() {
            dst.copy_cell_from(col, dst_row, src, col, src_row);
        }

        let record = entities.record_mut(entity.id());
        record.chunk = dst.index();
        record.row = dst_row;

        src.discard_row(src_row, entities, world_version, true);
        if src.is_empty() {
            src.begin_death_countdown();
        }
        if was_disabled {
            dst.enable_row(dst_row, false, entities);
        }
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("generic", &self.generic_sig)
            .field("unique", &self.unique_sig)
            .field("chunks", &self.chunks.len())
            .field("rows", &self.entity_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::entity::EntityId;

    #[derive(Clone, Copy)]
    struct A(#[allow(dead_code)] u32);
    impl Component for A {}

    #[derive(Clone, Copy)]
    struct B(#[allow(dead_code)] u64);
    impl Component for B {}

    fn id_of<T: Component>() -> Id {
        registry().get_or_create::<T>().unwrap().component_id()
    }

    #[test]
    fn test_signature_sorted_and_deduped() {
        let (a, b) = (id_of::<A>(), id_of::<B>());
        let sig = Signature::from_ids(SmallVec::from_slice(&[b, a, b]));
        assert_eq!(sig.len(), 2);
        assert!(sig.ids().windows(2).all(|w| w[0] < w[1]));
        assert!(sig.contains(a));
        assert!(sig.contains(b));
    }

    #[test]
    fn test_signature_with_without_roundtrip() {
        let (a, b) = (id_of::<A>(), id_of::<B>());
        let sig = Signature::from_ids(SmallVec::from_slice(&[a]));
        let grown = sig.with(b);
        assert!(grown.contains(b));
        let back = grown.without(b);
        assert_eq!(back, sig);
        assert_eq!(back.hash64(), sig.hash64());
    }

    #[test]
    fn test_signature_wildcard_match() {
        let rel = EntityId::new(1, 0);
        let tgt = EntityId::new(2, 0);
        let pair = Id::from_pair(EntityId::pair(rel, tgt));
        let sig = Signature::from_ids(SmallVec::from_slice(&[id_of::<A>(), pair]));

        let any_tgt = Id::from_pair(EntityId::pair(rel, EntityId::WILDCARD));
        assert!(sig.contains_match(any_tgt));
        let other = Id::from_pair(EntityId::pair(tgt, EntityId::WILDCARD));
        assert!(!sig.contains_match(other));
    }

    #[test]
    fn test_edges_complementary() {
        let a = id_of::<A>();
        let mut left = Edges::default();
        let mut right = Edges::default();

        left.add_edge_right(ComponentKind::Generic, a, 2);
        right.add_edge_left(ComponentKind::Generic, a, 1);

        assert_eq!(left.find_edge_right(ComponentKind::Generic, a), Some(2));
        assert_eq!(right.find_edge_left(ComponentKind::Generic, a), Some(1));
        assert_eq!(left.find_edge_left(ComponentKind::Generic, a), None);
        assert_eq!(right.find_edge_right(ComponentKind::Unique, a), None);
    }

    #[test]
    fn test_free_chunk_reused_until_full() {
        let sig = Signature::from_ids(SmallVec::from_slice(&[id_of::<A>()]));
        let mut arch = Archetype::new(1, sig, Signature::new());

        let first = arch.find_or_create_free_chunk();
        assert_eq!(first, 0);
        assert_eq!(arch.chunk_count(), 1);
        // Still has room: same chunk handed out again.
        assert_eq!(arch.find_or_create_free_chunk(), 0);
        assert_eq!(arch.chunk_count(), 1);
    }

    #[test]
    fn test_archetype_identity_hash() {
        let (a, b) = (id_of::<A>(), id_of::<B>());
        let sig_ab = Signature::from_ids(SmallVec::from_slice(&[a, b]));
        let sig_a = Signature::from_ids(SmallVec::from_slice(&[a]));

        let arch_ab = Archetype::new(1, sig_ab.clone(), Signature::new());
        let arch_ab2 = Archetype::new(2, sig_ab, Signature::new());
        let arch_a = Archetype::new(3, sig_a, Signature::new());

        assert_eq!(arch_ab.hash(), arch_ab2.hash());
        assert_ne!(arch_ab.hash(), arch_a.hash());
    }
}
