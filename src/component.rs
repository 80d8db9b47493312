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

//! Component trait and the process-wide descriptor registry.
//!
//! Every component type maps to exactly one [`ComponentDescriptor`] with a
//! stable address for the lifetime of the process. The core is polymorphic
//! over the descriptor's function pointers; there is no virtual dispatch on
//! component types.

use std::any::TypeId;
use std::sync::OnceLock;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::entity::{EntityId, Id};
use crate::error::{EcsError, Result};
use crate::utils::hash_sequence;
use crate::world::World;
use crate::MAX_COMPONENT_SIZE;

/// Maximum number of SoA sub-arrays per component
pub const MAX_SOA_SUBS: usize = 8;

/// Storage kind: stored once per row, or once per chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Per-row storage
    Generic = 0,
    /// Per-chunk singleton
    Unique = 1,
}

/// Number of component kinds
pub const KIND_COUNT: usize = 2;

/// SoA layout declaration: pack width and per-sub-array element sizes.
///
/// `SoaSpec::NONE` (one lane, no sub-arrays) means plain AoS storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoaSpec {
    pub lanes: u8,
    pub arity: u8,
    pub sub_sizes: [u8; MAX_SOA_SUBS],
}

impl SoaSpec {
    pub const NONE: SoaSpec = SoaSpec {
        lanes: 1,
        arity: 0,
        sub_sizes: [0; MAX_SOA_SUBS],
    };

    /// Declare a split layout: `lanes` must be 4, 8 or 16 and `subs` lists
    /// the byte size of each parallel sub-array.
    pub const fn split(lanes: u8, subs: &[u8]) -> SoaSpec {
        let mut sizes = [0u8; MAX_SOA_SUBS];
        let mut i = 0;
        while i < subs.len() {
            sizes[i] = subs[i];
            i += 1;
        }
        SoaSpec {
            lanes,
            arity: subs.len() as u8,
            sub_sizes: sizes,
        }
    }

    pub const fn is_soa(&self) -> bool {
        self.arity > 0
    }
}

/// Marker trait for components.
///
/// `Clone` is required so entities can be cloned; tag components derive it
/// trivially. Override `KIND` for per-chunk singletons and `SOA` for split
/// storage (SoA types must additionally be `Copy`).
pub trait Component: Clone + Send + Sync + 'static {
    const KIND: ComponentKind = ComponentKind::Generic;
    const SOA: SoaSpec = SoaSpec::NONE;
}

/// Hook invoked by the core after add, before remove, or after set.
/// Hooks must not perform structural changes.
pub type ComponentHook = fn(&mut World, &ComponentDescriptor, EntityId);

/// Optional user hooks carried by a descriptor
#[derive(Debug, Default, Clone, Copy)]
pub struct ComponentHooks {
    pub on_add: Option<ComponentHook>,
    pub on_remove: Option<ComponentHook>,
    pub on_set: Option<ComponentHook>,
}

/// Dense component identifier assigned by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u32);

/// Per-type metadata, immutable and globally shared.
///
/// Lifecycle operations the core needs are carried as function pointers;
/// moves and swaps are bitwise, so only drop and clone are captured. Both
/// are absent for SoA components, which are required to be trivially
/// copyable.
pub struct ComponentDescriptor {
    pub id: ComponentId,
    pub type_id: TypeId,
    /// Short symbolic name, stripped of module path segments
    pub name: &'static str,
    /// Full type name as reported by the compiler
    pub type_name: &'static str,
    /// Lookup hash over the full type name
    pub hash: u64,
    pub size: u32,
    pub align: u32,
    pub kind: ComponentKind,
    pub soa: SoaSpec,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
    pub clone_fn: Option<unsafe fn(*const u8, *mut u8)>,
    hooks: OnceLock<ComponentHooks>,
}

impl ComponentDescriptor {
    /// Signature/term identifier for this component
    pub fn component_id(&self) -> Id {
        Id::from_component(self.id.0)
    }

    /// Installed hooks, or the empty set
    pub fn hooks(&self) -> ComponentHooks {
        self.hooks.get().copied().unwrap_or_default()
    }
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("kind", &self.kind)
            .field("soa", &self.soa.is_soa())
            .finish()
    }
}

/// Strip module path segments from a type name, leaving generic arguments
/// intact: `a::b::Wrap<c::T>` becomes `Wrap<c::T>`.
fn normalize_type_name(full: &'static str) -> &'static str {
    let bytes = full.as_bytes();
    let mut depth = 0usize;
    let mut cut = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' => depth += 1,
            b'>' | b')' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && i + 1 < bytes.len() && bytes[i + 1] == b':' => {
                cut = i + 2;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    &full[cut..]
}

unsafe fn drop_impl<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

unsafe fn clone_impl<T: Clone>(src: *const u8, dst: *mut u8) {
    let value = (*(src as *const T)).clone();
    std::ptr::write(dst as *mut T, value);
}

#[derive(Default)]
struct RegistryInner {
    by_type: AHashMap<TypeId, &'static ComponentDescriptor>,
    by_name: AHashMap<&'static str, &'static ComponentDescriptor>,
    by_id: Vec<&'static ComponentDescriptor>,
}

/// Process-wide descriptor cache keyed by static type identity.
///
/// Descriptors are leaked on creation so their addresses stay stable; the
/// registry holds non-owning references by type, name and id.
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

/// The global registry
pub fn registry() -> &'static ComponentRegistry {
    static REGISTRY: OnceLock<ComponentRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| ComponentRegistry {
        inner: RwLock::new(RegistryInner::default()),
    })
}

impl ComponentRegistry {
    /// Obtain the descriptor for `T`, creating it on first request.
    pub fn get_or_create<T: Component>(&self) -> Result<&'static ComponentDescriptor> {
        let type_id = TypeId::of::<T>();
        if let Some(desc) = self.inner.read().by_type.get(&type_id) {
            return Ok(desc);
        }

        let mut inner = self.inner.write();
        if let Some(desc) = inner.by_type.get(&type_id) {
            return Ok(desc);
        }

        let size = std::mem::size_of::<T>();
        let type_name = std::any::type_name::<T>();
        if size > MAX_COMPONENT_SIZE {
            return Err(EcsError::ComponentTooLarge {
                name: normalize_type_name(type_name),
                size,
                max: MAX_COMPONENT_SIZE,
            });
        }

        let soa = T::SOA;
        if soa.is_soa() {
            debug_assert!(
                matches!(soa.lanes, 4 | 8 | 16),
                "SoA lane width must be 4, 8 or 16"
            );
            debug_assert!(
                !std::mem::needs_drop::<T>(),
                "SoA components must be trivially copyable"
            );
            let sub_total: usize = soa.sub_sizes[..soa.arity as usize]
                .iter()
                .map(|&s| s as usize)
                .sum();
            debug_assert_eq!(sub_total, size, "SoA sub-array sizes must cover the type");
        }

        let trivial = soa.is_soa();
        let desc: &'static ComponentDescriptor = Box::leak(Box::new(ComponentDescriptor {
            id: ComponentId(inner.by_id.len() as u32),
            type_id,
            name: normalize_type_name(type_name),
            type_name,
            hash: hash_sequence(type_name.bytes().map(u64::from)),
            size: size as u32,
            align: std::mem::align_of::<T>() as u32,
            kind: T::KIND,
            soa,
            drop_fn: if !trivial && std::mem::needs_drop::<T>() {
                Some(drop_impl::<T> as unsafe fn(*mut u8))
            } else {
                None
            },
            clone_fn: if trivial {
                None
            } else {
                Some(clone_impl::<T> as unsafe fn(*const u8, *mut u8))
            },
            hooks: OnceLock::new(),
        }));

        inner.by_type.insert(type_id, desc);
        inner.by_name.insert(desc.name, desc);
        inner.by_id.push(desc);
        Ok(desc)
    }

    /// Descriptor lookup without creation
    pub fn get<T: Component>(&self) -> Option<&'static ComponentDescriptor> {
        self.inner.read().by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn by_id(&self, id: ComponentId) -> Option<&'static ComponentDescriptor> {
        self.inner.read().by_id.get(id.0 as usize).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&'static ComponentDescriptor> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install hooks on `T`'s descriptor. Hooks can be installed once;
    /// returns false if a set was already present.
    pub fn set_hooks<T: Component>(&self, hooks: ComponentHooks) -> Result<bool> {
        let desc = self.get_or_create::<T>()?;
        Ok(desc.hooks.set(hooks).is_ok())
    }
}
