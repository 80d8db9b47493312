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

//! Error types

use std::fmt;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity not found or generation mismatch
    EntityNotFound,

    /// Entity id space exhausted
    CapacityExceeded,

    /// Component exceeds the maximum allowed byte size
    ComponentTooLarge {
        name: &'static str,
        size: usize,
        max: usize,
    },

    /// Component already present on the entity
    DuplicateComponent(&'static str),

    /// Component absent from the entity
    MissingComponent(&'static str),

    /// Structural change attempted while the target chunk is locked
    StructuralChangeLocked,

    /// Query exceeds the fixed term limit
    QueryTooManyTerms { count: usize, max: usize },

    /// Query command buffer could not be decoded
    QueryDecode(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity not found"),
            EcsError::CapacityExceeded => write!(f, "Entity id space exhausted"),
            EcsError::ComponentTooLarge { name, size, max } => {
                write!(f, "Component {name} is {size} bytes, max is {max}")
            }
            EcsError::DuplicateComponent(name) => {
                write!(f, "Component {name} already present on entity")
            }
            EcsError::MissingComponent(name) => {
                write!(f, "Component {name} not present on entity")
            }
            EcsError::StructuralChangeLocked => {
                write!(f, "Structural change attempted while chunk is locked")
            }
            EcsError::QueryTooManyTerms { count, max } => {
                write!(f, "Query has {count} terms, max is {max}")
            }
            EcsError::QueryDecode(msg) => write!(f, "Query command decode error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
