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

//! Chunk ECS - chunked archetype Entity Component System
//!
//! Entities live as rows inside fixed-size chunks, one chunk pool per
//! archetype. Structural changes navigate the archetype graph; queries are
//! compiled once, cached by hash and matched lazily as archetypes appear.

pub mod archetype;
pub mod chunk;
pub mod component;
pub mod entity;
pub mod entity_list;
pub mod error;
pub mod iter;
pub mod layout;
pub mod query;
pub mod utils;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, ArchetypeId, Signature};
pub use chunk::{Chunk, SoaView, SoaViewMut};
pub use component::{
    registry, Component, ComponentDescriptor, ComponentHooks, ComponentId, ComponentKind, SoaSpec,
};
pub use entity::{EntityId, Id};
pub use entity_list::EntityList;
pub use error::{EcsError, Result};
pub use iter::{ChunkView, Constraint};
pub use query::{Query, QueryBuilder, QueryPlan, TermOp};
pub use world::{World, WorldStats};

/// Fixed chunk buffer size in bytes
pub const CHUNK_BYTES: usize = 16 * 1024;

/// Chunk buffer alignment (one cache line)
pub const CHUNK_ALIGN: usize = 64;

/// Maximum terms accepted by the query compiler
pub const MAX_QUERY_TERMS: usize = 8;

/// Maximum component size in bytes
pub const MAX_COMPONENT_SIZE: usize = 255;

/// Rows migrated per defragmentation step in [`World::update`]
pub const DEFRAG_ROWS_PER_UPDATE: u32 = 100;

/// Update calls an empty chunk survives before its memory is reclaimed
pub const CHUNK_DEATH_TICKS: u32 = 3;

/// Chunks dispatched per query runner batch
pub const QUERY_BATCH_CHUNKS: usize = 16;

#[cfg(test)]
mod tests;
