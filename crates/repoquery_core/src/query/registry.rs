//! Repository registry: schemas, named queries and the descriptor cache.
//!
//! # Responsibility
//! - Own the configuration the resolver needs (entity schemas, named
//!   queries) as one explicit object constructed at startup.
//! - Cache one descriptor per declared method for the registry lifetime.
//!
//! # Invariants
//! - Entries are keyed by the whole declaration (text, fetch paths, lock,
//!   hints included); two declarations differing in any field never share
//!   a descriptor.
//! - The cache map lock only performs insert-if-absent of a per-method
//!   cell; resolution runs inside the cell initializer, so at most one
//!   descriptor is ever built for a declaration.
//! - Resolution failures are cached like successes.

use crate::query::descriptor::{resolve, QueryDescriptor};
use crate::query::error::ResolutionError;
use crate::query::method::QueryMethod;
use crate::schema::{EntitySchema, SchemaError, SchemaRegistry};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

type Slot = Arc<OnceCell<Result<Arc<QueryDescriptor>, ResolutionError>>>;

#[derive(Default)]
struct DescriptorCache {
    slots: Mutex<HashMap<QueryMethod, Slot>>,
}

impl DescriptorCache {
    fn slot(&self, method: &QueryMethod) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(*method).or_default())
    }

    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Process-scoped resolver state, shared by reference across threads.
pub struct RepositoryRegistry {
    schemas: SchemaRegistry,
    named: BTreeMap<String, &'static str>,
    cache: DescriptorCache,
}

impl RepositoryRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns the cached descriptor of `method`, resolving it on first use.
    pub fn resolve(&self, method: &QueryMethod) -> Result<Arc<QueryDescriptor>, ResolutionError> {
        let slot = self.cache.slot(method);
        slot.get_or_init(|| {
            let resolved = resolve(method, &self.schemas, &self.named).map(Arc::new);
            match &resolved {
                Ok(descriptor) => log::debug!(
                    "event=query_resolve module=query status=ok method={} strategy={} returns={:?}",
                    descriptor.method_name(),
                    descriptor.strategy,
                    descriptor.returns
                ),
                Err(err) => log::warn!(
                    "event=query_resolve module=query status=error method={} error={err}",
                    method.qualified_name()
                ),
            }
            resolved
        })
        .clone()
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn named_query(&self, name: &str) -> Option<&'static str> {
        self.named.get(name).copied()
    }

    /// Number of method declarations resolved (or attempted) so far.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// Builder for [`RepositoryRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    schemas: Vec<EntitySchema>,
    named: BTreeMap<String, &'static str>,
}

impl RegistryBuilder {
    pub fn entity(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Registers query text under `<Entity>.<method>`; a later registration
    /// of the same name replaces the earlier one.
    pub fn named_query(mut self, name: impl Into<String>, text: &'static str) -> Self {
        self.named.insert(name.into(), text);
        self
    }

    pub fn build(self) -> Result<RepositoryRegistry, SchemaError> {
        let mut schemas = SchemaRegistry::new();
        for schema in self.schemas {
            schemas.register(schema)?;
        }
        Ok(RepositoryRegistry {
            schemas,
            named: self.named,
            cache: DescriptorCache::default(),
        })
    }
}
