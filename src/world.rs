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

//! World: central entity and archetype storage.
//!
//! All structural change flows through the world: entity lifecycle, per
//! entity component mutation via the archetype graph, enable/disable, and
//! the garbage-collection step in [`World::update`]. The world version is a
//! monotone counter; per-chunk component versions are stamped with it to
//! drive query change filters.

use std::cell::RefCell;

use ahash::AHashMap;
use smallvec::SmallVec;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{Archetype, ArchetypeId, Signature, ROOT_ARCHETYPE};
use crate::component::{
    registry, Component, ComponentDescriptor, ComponentHook, ComponentKind,
};
use crate::entity::{EntityId, Id};
use crate::entity_list::EntityList;
use crate::error::{EcsError, Result};
use crate::query::{CachedQuery, QueryBuilder};
use crate::utils::hash_combine;
use crate::DEFRAG_ROWS_PER_UPDATE;

/// Aggregate world counters
#[derive(Debug, Clone, Copy)]
pub struct WorldStats {
    pub entities: usize,
    pub archetypes: usize,
    pub chunks: usize,
    pub world_version: u32,
    pub cached_queries: usize,
}

/// Central ECS world
pub struct World {
    /// Entity records in the implicit free list
    entities: EntityList,

    /// All archetypes; ids are stable indices into this list
    archetypes: Vec<Archetype>,

    /// Signature hash to candidate archetype ids
    archetype_index: AHashMap<u64, SmallVec<[ArchetypeId; 2]>>,

    /// Component id to the archetypes whose signatures mention it,
    /// in registration order; consumed by the query matcher
    by_component: AHashMap<Id, Vec<ArchetypeId>>,

    /// Compiled query plans and their match state, keyed by lookup hash
    pub(crate) queries: RefCell<AHashMap<u64, CachedQuery>>,

    /// Archetypes that own empty chunks awaiting their death countdown
    gc_pending: Vec<ArchetypeId>,

    /// Monotone world version
    version: u32,

    /// Round-robin archetype cursor for the defragmentation step
    defrag_cursor: usize,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        let mut world = Self {
            entities: EntityList::new(),
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            by_component: AHashMap::with_capacity(64),
            queries: RefCell::new(AHashMap::with_capacity(32)),
            gc_pending: Vec::new(),
            // Version 0 is reserved so change filters always fire for the
            // first write.
            version: 1,
            defrag_cursor: 0,
        };

        // Bootstrap the root archetype (entities with no components);
        // always id 0.
        let root = world.register_archetype(Signature::new(), Signature::new());
        debug_assert_eq!(root, ROOT_ARCHETYPE);
        world
    }

    /// Current world version
    pub fn version(&self) -> u32 {
        self.version
    }

    fn bump_version(&mut self) {
        // Wraparound would break change detection.
        if self.version == u32::MAX {
            panic!("World version overflow at {}", self.version);
        }
        self.version += 1;
    }

    // ========== Entity lifecycle ==========

    /// Allocate an entity and place it in the root archetype.
    pub fn add_entity(&mut self) -> Result<EntityId> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.add_entity").entered();

        let entity = self.entities.alloc()?;
        self.bump_version();
        self.place_entity(entity, ROOT_ARCHETYPE);
        Ok(entity)
    }

    /// Allocate `count` entities in the root archetype.
    pub fn add_entity_n(&mut self, count: usize) -> Result<Vec<EntityId>> {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.add_entity_n", count).entered();

        self.bump_version();
        let version = self.version;
        let mut out = Vec::with_capacity(count);
        let arch = &mut self.archetypes[ROOT_ARCHETYPE as usize];
        let mut ci = arch.find_or_create_free_chunk();
        for _ in 0..count {
            let entity = self.entities.alloc()?;
            if arch.chunk(ci).is_full() {
                ci = arch.find_or_create_free_chunk();
            }
            let row = arch.chunk_mut(ci).add_row(entity, version, true);
            let record = self.entities.get_mut(entity).expect("freshly allocated");
            record.archetype = ROOT_ARCHETYPE;
            record.chunk = ci;
            record.row = row;
            out.push(entity);
        }
        Ok(out)
    }

    /// Allocate an entity as a copy of `source`: same archetype, per-row
    /// components cloned. Per-chunk components are not duplicated; the
    /// destination chunk keeps its own.
    pub fn add_entity_cloned(&mut self, source: EntityId) -> Result<EntityId> {
        let src_rec = *self.entities.get(source).ok_or(EcsError::EntityNotFound)?;
        let entity = self.entities.alloc()?;
        self.bump_version();
        let version = self.version;

        let aid = src_rec.archetype;
        let arch = &mut self.archetypes[aid as usize];
        let dst_ci = arch.find_or_create_free_chunk();
        let dst_row = arch.chunk_mut(dst_ci).add_row(entity, version, true);

        let columns = arch.layout().columns.len();
        if src_rec.chunk == dst_ci {
            let chunk = arch.chunk_mut(dst_ci);
            for col in 0..columns {
                chunk.clone_row_cell_within(col, src_rec.row, dst_row);
            }
        } else {
            let (src_chunk, dst_chunk) = {
                let chunks = arch.chunks_mut();
                let (lo, hi) = (src_rec.chunk.min(dst_ci), src_rec.chunk.max(dst_ci));
                let (left, right) = chunks.split_at_mut(hi as usize);
                if src_rec.chunk == lo {
                    (&mut left[lo as usize], &mut right[0])
                } else {
                    let (s, d) = (&mut right[0], &mut left[lo as usize]);
                    (s, d)
                }
            };
            for col in 0..columns {
                dst_chunk.clone_cell_from(col, dst_row, src_chunk, col, src_rec.row);
            }
        }

        let record = self.entities.get_mut(entity).expect("freshly allocated");
        record.archetype = aid;
        record.chunk = dst_ci;
        record.row = dst_row;
        Ok(entity)
    }

    /// Remove the entity's row and release its slot.
    pub fn delete_entity(&mut self, entity: EntityId) -> Result<()> {
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let arch = &self.archetypes[rec.archetype as usize];
        if arch.chunk(rec.chunk).is_locked() {
            return Err(EcsError::StructuralChangeLocked);
        }

        // Removal hooks fire before the rows disappear.
        let hooks = self.collect_hooks(rec.archetype, |h| h.on_remove);
        for (hook, desc) in hooks {
            hook(self, desc, entity);
        }

        self.bump_version();
        let version = self.version;
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let arch = &mut self.archetypes[rec.archetype as usize];
        arch.chunk_mut(rec.chunk)
            .remove_row(rec.row, &mut self.entities, version, true);
        if arch.chunk(rec.chunk).is_empty() {
            arch.chunk_mut(rec.chunk).begin_death_countdown();
            Self::note_gc(&mut self.gc_pending, rec.archetype);
        }
        self.entities.free(entity);
        Ok(())
    }

    /// Generation-checked liveness probe
    pub fn is_valid(&self, entity: EntityId) -> bool {
        self.entities.is_valid(entity)
    }

    // ========== Component mutation ==========

    /// Add a component to an entity, moving it along the archetype graph.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        let desc = registry().get_or_create::<T>()?;
        let id = desc.component_id();
        self.add_id(entity, id, desc.kind)?;

        // Write the fresh column cell (or the chunk singleton).
        let rec = *self.entities.get(entity).expect("validated by add_id");
        let version = self.version;
        let chunk = self.archetypes[rec.archetype as usize].chunk_mut(rec.chunk);
        match desc.kind {
            ComponentKind::Generic => {
                let col = chunk
                    .layout()
                    .column_index(id)
                    .expect("destination archetype carries the new column");
                chunk.write_cell_init(col, rec.row, value);
                chunk.bump_version(id, version);
            }
            ComponentKind::Unique => {
                chunk.set_unique(value, version);
            }
        }

        if let Some(hook) = desc.hooks().on_add {
            hook(self, desc, entity);
        }
        Ok(())
    }

    /// Remove a component from an entity, moving it along the archetype
    /// graph. The removal hook fires before the value is dropped.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        let desc = registry().get_or_create::<T>()?;
        let id = desc.component_id();

        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let src_arch = &self.archetypes[rec.archetype as usize];
        if !src_arch.has_id(id) {
            return Err(EcsError::MissingComponent(desc.name));
        }
        if src_arch.chunk(rec.chunk).is_locked() {
            return Err(EcsError::StructuralChangeLocked);
        }
        if let Some(hook) = desc.hooks().on_remove {
            hook(self, desc, entity);
        }
        self.remove_id_untyped(entity, id, desc.kind, Some(desc))
    }

    /// Tag the entity with a relation pair.
    pub fn add_relation(
        &mut self,
        entity: EntityId,
        relation: EntityId,
        target: EntityId,
    ) -> Result<()> {
        let pair = EntityId::pair(relation, target);
        debug_assert!(!pair.has_wildcard(), "cannot attach a wildcard pair");
        self.add_id(entity, Id::from_pair(pair), ComponentKind::Generic)
    }

    /// Remove a relation pair tag.
    pub fn remove_relation(
        &mut self,
        entity: EntityId,
        relation: EntityId,
        target: EntityId,
    ) -> Result<()> {
        let pair = EntityId::pair(relation, target);
        debug_assert!(!pair.has_wildcard(), "cannot detach a wildcard pair");
        let id = Id::from_pair(pair);
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        if !self.archetypes[rec.archetype as usize].generic_signature().contains(id) {
            return Err(EcsError::MissingComponent("pair"));
        }
        self.remove_id_untyped(entity, id, ComponentKind::Generic, None)
    }

    /// Wildcard-aware relation probe
    pub fn has_relation(&self, entity: EntityId, relation: EntityId, target: EntityId) -> bool {
        let id = Id::from_pair(EntityId::pair(relation, target));
        match self.entities.get(entity) {
            Some(rec) => self.archetypes[rec.archetype as usize]
                .generic_signature()
                .contains_match(id),
            None => false,
        }
    }

    fn add_id(&mut self, entity: EntityId, id: Id, kind: ComponentKind) -> Result<()> {
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let src_aid = rec.archetype;
        let src_arch = &self.archetypes[src_aid as usize];
        if src_arch.has_id(id) {
            return Err(EcsError::DuplicateComponent(describe_id(id)));
        }
        if src_arch.chunk(rec.chunk).is_locked() {
            return Err(EcsError::StructuralChangeLocked);
        }

        let dst_aid = self.archetype_after_add(src_aid, id, kind);
        self.bump_version();
        self.move_entity_rows(entity, dst_aid, None);
        Ok(())
    }

    fn remove_id_untyped(
        &mut self,
        entity: EntityId,
        id: Id,
        kind: ComponentKind,
        desc: Option<&'static ComponentDescriptor>,
    ) -> Result<()> {
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let src_aid = rec.archetype;
        let src_arch = &self.archetypes[src_aid as usize];
        if !src_arch.has_id(id) {
            return Err(EcsError::MissingComponent(desc.map(|d| d.name).unwrap_or("pair")));
        }
        if src_arch.chunk(rec.chunk).is_locked() {
            return Err(EcsError::StructuralChangeLocked);
        }

        let dst_aid = self.archetype_after_remove(src_aid, id, kind);
        self.bump_version();
        // The abandoned per-row cell is dropped during the move; per-chunk
        // values stay with the source chunk.
        let dropped = matches!(kind, ComponentKind::Generic).then_some(id);
        self.move_entity_rows(entity, dst_aid, dropped);
        Ok(())
    }

    /// Write a per-row component (or chunk singleton), bumping its chunk
    /// version and the world version.
    pub fn set<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        let desc = registry().get_or_create::<T>()?;
        self.write_component(entity, desc, value, true)?;
        if let Some(hook) = desc.hooks().on_set {
            hook(self, desc, entity);
        }
        Ok(())
    }

    /// Write a per-row component without touching any version counter.
    pub fn set_silent<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        let desc = registry().get_or_create::<T>()?;
        self.write_component(entity, desc, value, false)
    }

    fn write_component<T: Component>(
        &mut self,
        entity: EntityId,
        desc: &'static ComponentDescriptor,
        value: T,
        bump: bool,
    ) -> Result<()> {
        let id = desc.component_id();
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let arch = &self.archetypes[rec.archetype as usize];
        if !arch.has_id(id) {
            return Err(EcsError::MissingComponent(desc.name));
        }

        if bump {
            self.bump_version();
        }
        let version = self.version;
        let chunk = self.archetypes[rec.archetype as usize].chunk_mut(rec.chunk);
        match desc.kind {
            ComponentKind::Generic => {
                let col = chunk.layout().column_index(id).expect("checked above");
                chunk.write_cell_replace(col, rec.row, value);
                if bump {
                    chunk.bump_version(id, version);
                }
            }
            ComponentKind::Unique => {
                // Silent writes keep the previously stamped version.
                let stamp = if bump {
                    version
                } else {
                    chunk.version_of(id).unwrap_or(0)
                };
                chunk.set_unique(value, stamp);
            }
        }
        Ok(())
    }

    /// Read a per-row AoS component or a chunk singleton.
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let rec = self.entities.get(entity)?;
        let chunk = self.archetypes[rec.archetype as usize].chunk(rec.chunk);
        match T::KIND {
            ComponentKind::Generic => chunk.view::<T>().map(|s| &s[rec.row as usize]),
            ComponentKind::Unique => chunk.unique::<T>(),
        }
    }

    /// Read a component by value; works for SoA components too.
    pub fn get_value<T: Component>(&self, entity: EntityId) -> Option<T> {
        let rec = self.entities.get(entity)?;
        let desc = registry().get::<T>()?;
        let chunk = self.archetypes[rec.archetype as usize].chunk(rec.chunk);
        match desc.kind {
            ComponentKind::Generic => {
                let col = chunk.layout().column_index(desc.component_id())?;
                Some(chunk.read_cell::<T>(col, rec.row))
            }
            ComponentKind::Unique => chunk.unique::<T>().cloned(),
        }
    }

    /// Constant-time component presence check
    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        let desc = match registry().get::<T>() {
            Some(d) => d,
            None => return false,
        };
        match self.entities.get(entity) {
            Some(rec) => self.archetypes[rec.archetype as usize].has_id(desc.component_id()),
            None => false,
        }
    }

    // ========== Enable / disable ==========

    /// Move the entity across its chunk's enabled/disabled boundary.
    /// Enabling an enabled entity is a no-op.
    pub fn enable_entity(&mut self, entity: EntityId, enable: bool) -> Result<()> {
        let rec = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let arch = &self.archetypes[rec.archetype as usize];
        if arch.chunk(rec.chunk).is_locked() {
            return Err(EcsError::StructuralChangeLocked);
        }
        if rec.disabled != enable {
            // Already in the requested state.
            return Ok(());
        }

        self.bump_version();
        let arch = &mut self.archetypes[rec.archetype as usize];
        arch.chunk_mut(rec.chunk)
            .enable_row(rec.row, enable, &mut self.entities);
        Ok(())
    }

    pub fn is_enabled(&self, entity: EntityId) -> bool {
        self.entities.get(entity).map(|r| !r.disabled).unwrap_or(false)
    }

    // ========== Maintenance ==========

    /// Garbage collection step: progress chunk death countdowns, drop empty
    /// chunks whose countdown elapsed, then run one bounded
    /// defragmentation step.
    pub fn update(&mut self) {
        #[cfg(feature = "profiling")]
        let _span = info_span!("world.update").entered();

        self.bump_version();
        let version = self.version;

        for aid in std::mem::take(&mut self.gc_pending) {
            let mut still_pending = false;
            {
                let arch = &mut self.archetypes[aid as usize];
                let mut ci = 0u32;
                while (ci as usize) < arch.chunk_count() {
                    let chunk = arch.chunk_mut(ci);
                    if chunk.is_empty() && !chunk.is_locked() {
                        if chunk.tick_death_countdown() {
                            arch.remove_chunk(ci, &mut self.entities);
                            continue;
                        }
                        still_pending = true;
                    }
                    ci += 1;
                }
            }
            if still_pending {
                Self::note_gc(&mut self.gc_pending, aid);
            }
        }

        if !self.archetypes.is_empty() {
            let idx = self.defrag_cursor % self.archetypes.len();
            self.defrag_cursor = self.defrag_cursor.wrapping_add(1);
            let moved =
                self.archetypes[idx].defragment(DEFRAG_ROWS_PER_UPDATE, &mut self.entities, version);
            if moved > 0 {
                Self::note_gc(&mut self.gc_pending, idx as ArchetypeId);
            }
        }
    }

    fn note_gc(pending: &mut Vec<ArchetypeId>, aid: ArchetypeId) {
        if !pending.contains(&aid) {
            pending.push(aid);
        }
    }

    // ========== Queries ==========

    /// Start building a query against this world.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    // ========== Introspection ==========

    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    /// Archetype the entity currently lives in
    pub fn entity_archetype(&self, entity: EntityId) -> Option<ArchetypeId> {
        self.entities.get(entity).map(|r| r.archetype)
    }

    /// Free-chain integrity check over the entity table
    pub fn validate_entities(&self) -> bool {
        self.entities.validate()
    }

    pub fn cached_query_count(&self) -> usize {
        self.queries.borrow().len()
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            entities: self.entities.live_count(),
            archetypes: self.archetypes.len(),
            chunks: self.archetypes.iter().map(|a| a.chunk_count()).sum(),
            world_version: self.version,
            cached_queries: self.queries.borrow().len(),
        }
    }

    pub(crate) fn archetype_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id as usize]
    }

    /// Advance the query's match state and snapshot what a run needs.
    /// Panics if the query was built against a different world.
    pub(crate) fn refresh_query(
        &self,
        hash: u64,
    ) -> (std::sync::Arc<crate::query::QueryPlan>, Vec<ArchetypeId>, u32) {
        let mut queries = self.queries.borrow_mut();
        let cached = queries
            .get_mut(&hash)
            .expect("query was not built against this world");
        cached.match_new(&self.archetypes, &self.by_component);
        (
            cached.plan.clone(),
            cached.matched.clone(),
            cached.last_seen_version,
        )
    }

    /// A run whose plan holds write access may stamp per-component versions
    /// through its views; the world version advances with it.
    pub(crate) fn bump_for_query_write(&mut self) {
        self.bump_version();
    }

    /// Advance the query's last-seen version to the current world version.
    pub(crate) fn finish_query(&self, hash: u64) {
        if let Some(cached) = self.queries.borrow_mut().get_mut(&hash) {
            cached.last_seen_version = self.version;
        }
    }

    // ========== Archetype registration & graph navigation ==========

    /// Find or create the archetype with the given signatures.
    fn register_archetype(&mut self, generic: Signature, unique: Signature) -> ArchetypeId {
        let hash = hash_combine(generic.hash64(), unique.hash64());
        if let Some(candidates) = self.archetype_index.get(&hash) {
            for &aid in candidates {
                let arch = &self.archetypes[aid as usize];
                if arch.generic_signature() == &generic && arch.unique_signature() == &unique {
                    return aid;
                }
            }
        }

        let aid = self.archetypes.len() as ArchetypeId;
        let arch = Archetype::new(aid, generic, unique);
        for &id in arch
            .generic_signature()
            .ids()
            .iter()
            .chain(arch.unique_signature().ids())
        {
            self.by_component.entry(id).or_default().push(aid);
        }
        self.archetypes.push(arch);
        self.archetype_index.entry(hash).or_default().push(aid);
        aid
    }

    /// Destination of `src ⊕ add(id)`.
    ///
    /// The root archetype stores no edges, so moves out of the root always
    /// take the signature-map path.
    fn archetype_after_add(&mut self, src: ArchetypeId, id: Id, kind: ComponentKind) -> ArchetypeId {
        if src != ROOT_ARCHETYPE {
            if let Some(dst) = self.archetypes[src as usize].edges.find_edge_right(kind, id) {
                return dst;
            }
        }

        let src_arch = &self.archetypes[src as usize];
        let (generic, unique) = match kind {
            ComponentKind::Generic => (
                src_arch.generic_signature().with(id),
                src_arch.unique_signature().clone(),
            ),
            ComponentKind::Unique => (
                src_arch.generic_signature().clone(),
                src_arch.unique_signature().with(id),
            ),
        };
        let dst = self.register_archetype(generic, unique);

        if src != ROOT_ARCHETYPE {
            self.archetypes[src as usize].edges.add_edge_right(kind, id, dst);
        }
        // The complementary edge may already exist when the destination was
        // reached from another path; it necessarily points back at `src`.
        if self.archetypes[dst as usize].edges.find_edge_left(kind, id).is_none() {
            self.archetypes[dst as usize].edges.add_edge_left(kind, id, src);
        }
        dst
    }

    /// Destination of `src ⊖ remove(id)`.
    fn archetype_after_remove(
        &mut self,
        src: ArchetypeId,
        id: Id,
        kind: ComponentKind,
    ) -> ArchetypeId {
        if let Some(dst) = self.archetypes[src as usize].edges.find_edge_left(kind, id) {
            return dst;
        }

        let src_arch = &self.archetypes[src as usize];
        let (generic, unique) = match kind {
            ComponentKind::Generic => (
                src_arch.generic_signature().without(id),
                src_arch.unique_signature().clone(),
            ),
            ComponentKind::Unique => (
                src_arch.generic_signature().clone(),
                src_arch.unique_signature().without(id),
            ),
        };
        let dst = self.register_archetype(generic, unique);

        self.archetypes[src as usize].edges.add_edge_left(kind, id, dst);
        if dst != ROOT_ARCHETYPE
            && self.archetypes[dst as usize].edges.find_edge_right(kind, id).is_none()
        {
            self.archetypes[dst as usize].edges.add_edge_right(kind, id, src);
        }
        dst
    }

    /// Place a fresh entity into an archetype's free chunk.
    fn place_entity(&mut self, entity: EntityId, aid: ArchetypeId) {
        let version = self.version;
        let arch = &mut self.archetypes[aid as usize];
        let ci = arch.find_or_create_free_chunk();
        let row = arch.chunk_mut(ci).add_row(entity, version, true);
        let record = self.entities.get_mut(entity).expect("freshly allocated");
        record.archetype = aid;
        record.chunk = ci;
        record.row = row;
    }

    /// Move an entity's row to another archetype, copying every component
    /// retained by the destination signature. `dropped` names the per-row
    /// component abandoned by a removal; its cell is dropped in place.
    fn move_entity_rows(&mut self, entity: EntityId, dst_aid: ArchetypeId, dropped: Option<Id>) {
        let rec = *self.entities.get(entity).expect("validated by caller");
        let src_aid = rec.archetype;
        debug_assert_ne!(src_aid, dst_aid);

        let version = self.version;
        let dst_ci = self.archetypes[dst_aid as usize].find_or_create_free_chunk();

        let (src_arch, dst_arch) = if src_aid < dst_aid {
            let (left, right) = self.archetypes.split_at_mut(dst_aid as usize);
            (&mut left[src_aid as usize], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(src_aid as usize);
            (&mut right[0], &mut left[dst_aid as usize])
        };
        let src_chunk = src_arch.chunk_mut(rec.chunk);
        let dst_chunk = dst_arch.chunk_mut(dst_ci);

        let dst_row = dst_chunk.add_row(entity, version, true);

        // Copy the intersection of the two layouts; cells move bitwise.
        let columns = dst_chunk.layout().columns.len();
        for dcol in 0..columns {
            let id = dst_chunk.layout().columns[dcol].id;
            if let Some(scol) = src_chunk.layout().column_index(id) {
                dst_chunk.copy_cell_from(dcol, dst_row, src_chunk, scol, rec.row);
            }
        }

        // A removed per-row component was not copied anywhere: drop it now.
        if let Some(id) = dropped {
            if let Some(scol) = src_chunk.layout().column_index(id) {
                if let Some(drop_fn) = src_chunk.layout().columns[scol].desc.drop_fn {
                    // SAFETY: live cell about to be discarded without a drop.
                    unsafe { drop_fn(src_chunk.aos_cell_ptr(scol, rec.row)) };
                }
            }
        }

        src_chunk.discard_row(rec.row, &mut self.entities, version, true);
        let src_empty = src_chunk.is_empty();
        if src_empty {
            src_chunk.begin_death_countdown();
        }

        let record = self.entities.record_mut(entity.id());
        record.archetype = dst_aid;
        record.chunk = dst_ci;
        record.row = dst_row;
        let was_disabled = record.disabled;

        // A disabled entity keeps its state across the move.
        if was_disabled {
            dst_arch
                .chunk_mut(dst_ci)
                .enable_row(dst_row, false, &mut self.entities);
        }

        if src_empty {
            Self::note_gc(&mut self.gc_pending, src_aid);
        }
    }

    fn collect_hooks(
        &self,
        aid: ArchetypeId,
        pick: impl Fn(&crate::component::ComponentHooks) -> Option<ComponentHook>,
    ) -> SmallVec<[(ComponentHook, &'static ComponentDescriptor); 4]> {
        let arch = &self.archetypes[aid as usize];
        arch.layout()
            .columns
            .iter()
            .filter_map(|c| pick(&c.desc.hooks()).map(|h| (h, c.desc)))
            .collect()
    }
}

fn describe_id(id: Id) -> &'static str {
    if id.is_pair() {
        return "pair";
    }
    registry()
        .by_id(crate::component::ComponentId(id.component_index()))
        .map(|d| d.name)
        .unwrap_or("component")
}
