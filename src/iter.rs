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

//! Query runner: batched chunk dispatch with change-version skipping.
//!
//! Matched chunks are filtered by the enabled/disabled constraint and the
//! plan's change filter, then handed to the user callback in batches of
//! [`crate::QUERY_BATCH_CHUNKS`], locking each chunk across its callback.

use std::marker::PhantomData;
use std::ptr::NonNull;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::ArchetypeId;
use crate::chunk::{Chunk, SoaView, SoaViewMut};
use crate::component::Component;
use crate::entity::EntityId;
use crate::error::Result;
use crate::utils::prefetch_read;
use crate::world::World;
use crate::QUERY_BATCH_CHUNKS;

/// Which rows of a chunk an iteration visits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Constraint {
    /// Rows `[disabled, count)`
    #[default]
    EnabledOnly,
    /// Rows `[0, disabled)`
    DisabledOnly,
    /// Rows `[0, count)`
    AcceptAll,
}

impl Constraint {
    pub(crate) fn range(self, chunk: &Chunk) -> (u32, u32) {
        match self {
            Constraint::EnabledOnly => (chunk.size_disabled(), chunk.size()),
            Constraint::DisabledOnly => (0, chunk.size_disabled()),
            Constraint::AcceptAll => (0, chunk.size()),
        }
    }
}

/// One locked chunk handed to a query callback.
///
/// Row bounds honor the iteration constraint. AoS views are sliced to the
/// bounds and indexed from 0; SoA accessors cover the chunk's full padded
/// row range and are indexed by the absolute rows in [`rows`](Self::rows).
pub struct ChunkView<'a> {
    chunk: NonNull<Chunk>,
    from: u32,
    to: u32,
    world_version: u32,
    _marker: PhantomData<&'a mut Chunk>,
}

impl<'a> ChunkView<'a> {
    pub(crate) fn new(chunk: &'a mut Chunk, from: u32, to: u32, world_version: u32) -> Self {
        ChunkView {
            chunk: NonNull::from(chunk),
            from,
            to,
            world_version,
            _marker: PhantomData,
        }
    }

    fn chunk(&self) -> &Chunk {
        // SAFETY: constructed from an exclusive borrow with lifetime 'a.
        unsafe { self.chunk.as_ref() }
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        // SAFETY: constructed from an exclusive borrow with lifetime 'a;
        // &mut self keeps the access unique.
        unsafe { self.chunk.as_mut() }
    }

    pub fn len(&self) -> usize {
        (self.to - self.from) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Absolute row bounds for SoA accessor indexing
    pub fn rows(&self) -> std::ops::Range<usize> {
        self.from as usize..self.to as usize
    }

    /// Entities of the visited rows
    pub fn entities(&self) -> &[EntityId] {
        &self.chunk().entities()[self.from as usize..self.to as usize]
    }

    /// Entity at view-relative index `i`
    pub fn entity(&self, i: usize) -> EntityId {
        self.entities()[i]
    }

    /// Read-only view over the visited rows.
    ///
    /// Panics if the chunk does not carry an AoS column of `T`; queries
    /// guarantee presence for All terms.
    pub fn view<T: Component>(&self) -> &[T] {
        let slice = self
            .chunk()
            .view::<T>()
            .expect("component not stored in this chunk");
        &slice[self.from as usize..self.to as usize]
    }

    /// Writable view over the visited rows; bumps the component's chunk
    /// version to the current world version.
    pub fn view_mut<T: Component>(&mut self) -> &mut [T] {
        let (from, to, version) = (self.from as usize, self.to as usize, self.world_version);
        let slice = self
            .chunk_mut()
            .view_mut::<T>(version)
            .expect("component not stored in this chunk");
        &mut slice[from..to]
    }

    /// Writable view without a version bump
    pub fn sview_mut<T: Component>(&mut self) -> &mut [T] {
        let (from, to) = (self.from as usize, self.to as usize);
        let slice = self
            .chunk_mut()
            .sview_mut::<T>()
            .expect("component not stored in this chunk");
        &mut slice[from..to]
    }

    /// Lane-aware read view of a SoA column; index with [`rows`](Self::rows)
    pub fn soa_view<T: Component>(&self) -> SoaView<'_> {
        self.chunk()
            .soa_view::<T>()
            .expect("component not stored as SoA in this chunk")
    }

    /// Lane-aware write view; bumps the component's chunk version
    pub fn soa_view_mut<T: Component>(&mut self) -> SoaViewMut<'_> {
        let version = self.world_version;
        self.chunk_mut()
            .soa_view_mut::<T>(version)
            .expect("component not stored as SoA in this chunk")
    }

    /// The chunk's singleton component, if set
    pub fn unique<T: Component>(&self) -> Option<&T> {
        self.chunk().unique::<T>()
    }
}

/// Candidate chunks for one run: constraint-non-empty and, when the plan
/// carries change filters, changed since the query's last seen version.
fn collect_chunks(
    world: &World,
    matched: &[ArchetypeId],
    changed_ids: &[crate::entity::Id],
    constraint: Constraint,
    last_seen: u32,
) -> Vec<(ArchetypeId, u32)> {
    let mut pending = Vec::new();
    for &aid in matched {
        let arch = world.archetype(aid).expect("matched archetype exists");
        for ci in 0..arch.chunk_count() as u32 {
            let chunk = arch.chunk(ci);
            let (from, to) = constraint.range(chunk);
            if from >= to {
                continue;
            }
            if !changed_ids.is_empty() && !changed_ids.iter().any(|&id| chunk.changed(id, last_seen))
            {
                continue;
            }
            pending.push((aid, ci));
        }
    }
    pending
}

pub(crate) fn run_query<F: FnMut(ChunkView<'_>)>(
    world: &mut World,
    hash: u64,
    constraint: Constraint,
    mut f: F,
) -> Result<()> {
    #[cfg(feature = "profiling")]
    let _span = info_span!("query.each", hash).entered();

    let (plan, matched, last_seen) = world.refresh_query(hash);
    // Writable views stamp component versions; give them a fresh world
    // version so readers' change filters can see the writes.
    if plan.has_writes() {
        world.bump_for_query_write();
    }
    let version = world.version();
    let pending = collect_chunks(world, &matched, plan.changed_ids(), constraint, last_seen);

    for batch in pending.chunks(QUERY_BATCH_CHUNKS) {
        for (i, &(aid, ci)) in batch.iter().enumerate() {
            if i + 1 < batch.len() {
                let (next_aid, next_ci) = batch[i + 1];
                prefetch_read(
                    world
                        .archetype(next_aid)
                        .expect("matched archetype exists")
                        .chunk(next_ci)
                        .data_ptr(),
                );
            }

            let chunk = world.archetype_mut(aid).chunk_mut(ci);
            let (from, to) = constraint.range(chunk);
            if from >= to {
                continue;
            }
            chunk.lock(true);
            f(ChunkView::new(chunk, from, to, version));
            world.archetype_mut(aid).chunk_mut(ci).lock(false);
        }
    }

    world.finish_query(hash);
    Ok(())
}

/// Parallel variant: matched chunks fan out on the rayon pool.
///
/// Each chunk is dispatched exactly once, so callback invocations have
/// exclusive access to their chunk; the caller must not touch the world
/// from inside the callback.
#[cfg(feature = "parallel")]
pub(crate) fn run_query_par<F>(
    world: &mut World,
    hash: u64,
    constraint: Constraint,
    f: F,
) -> Result<()>
where
    F: Fn(ChunkView<'_>) + Send + Sync,
{
    use rayon::prelude::*;

    #[cfg(feature = "profiling")]
    let _span = info_span!("query.each_par", hash).entered();

    let (plan, matched, last_seen) = world.refresh_query(hash);
    if plan.has_writes() {
        world.bump_for_query_write();
    }
    let version = world.version();
    let pending = collect_chunks(world, &matched, plan.changed_ids(), constraint, last_seen);

    let world_addr = world as *mut World as usize;
    pending.par_iter().for_each(|&(aid, ci)| {
        // SAFETY: every (archetype, chunk) pair appears once in `pending`,
        // so this closure invocation has exclusive access to its chunk; the
        // world outlives the parallel loop and no other code runs on it.
        let world = unsafe { &mut *(world_addr as *mut World) };
        let chunk = world.archetype_mut(aid).chunk_mut(ci);
        let (from, to) = constraint.range(chunk);
        if from >= to {
            return;
        }
        chunk.lock(true);
        f(ChunkView::new(chunk, from, to, version));
        // SAFETY: as above; re-borrow to release the lock.
        let world = unsafe { &mut *(world_addr as *mut World) };
        world.archetype_mut(aid).chunk_mut(ci).lock(false);
    });

    world.finish_query(hash);
    Ok(())
}

/// Row count under the constraint. Change filters are deliberately ignored
/// and the query's cursor does not advance.
pub(crate) fn count_query(world: &World, hash: u64, constraint: Constraint) -> usize {
    let (_, matched, _) = world.refresh_query(hash);
    matched
        .iter()
        .map(|&aid| {
            let arch = world.archetype(aid).expect("matched archetype exists");
            arch.chunks()
                .iter()
                .map(|c| {
                    let (from, to) = constraint.range(c);
                    (to - from) as usize
                })
                .sum::<usize>()
        })
        .sum()
}

pub(crate) fn first_entity(world: &World, hash: u64, constraint: Constraint) -> Option<EntityId> {
    let (_, matched, _) = world.refresh_query(hash);
    for &aid in &matched {
        let arch = world.archetype(aid).expect("matched archetype exists");
        for chunk in arch.chunks() {
            let (from, to) = constraint.range(chunk);
            if from < to {
                return Some(chunk.entities()[from as usize]);
            }
        }
    }
    None
}

pub(crate) fn collect_entities(
    world: &World,
    hash: u64,
    constraint: Constraint,
    out: &mut Vec<EntityId>,
) {
    let (_, matched, _) = world.refresh_query(hash);
    for &aid in &matched {
        let arch = world.archetype(aid).expect("matched archetype exists");
        for chunk in arch.chunks() {
            let (from, to) = constraint.range(chunk);
            out.extend_from_slice(&chunk.entities()[from as usize..to as usize]);
        }
    }
}
