//! Entity registry boundary.
//!
//! The host ORM owns the mapping from logical model names (`sale.line`) to
//! physical tables. The warehouse only needs to ask two questions:
//!
//! - "is this model available?" ([`EntityRegistry::resolve`]), used for
//!   optional modules;
//! - "give me this model or fail" ([`EntityRegistry::table`]), used for
//!   required ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RegistryError, RegistryResult};
use crate::table::TableRef;

/// Resolves logical model names to table handles.
pub trait EntityRegistry: Send + Sync {
    /// Capability query: `None` when the model is not part of this deployment.
    fn resolve(&self, model: &str) -> Option<TableRef>;

    /// Resolve a required model.
    fn table(&self, model: &str) -> RegistryResult<TableRef> {
        self.resolve(model)
            .ok_or_else(|| RegistryError::not_registered(model))
    }

    fn contains(&self, model: &str) -> bool {
        self.resolve(model).is_some()
    }
}

impl<R: EntityRegistry + ?Sized> EntityRegistry for &R {
    fn resolve(&self, model: &str) -> Option<TableRef> {
        (**self).resolve(model)
    }
}

impl<R: EntityRegistry + ?Sized> EntityRegistry for Arc<R> {
    fn resolve(&self, model: &str) -> Option<TableRef> {
        (**self).resolve(model)
    }
}

/// Registry backed by an explicit model -> table map.
///
/// Table names follow the ORM convention of replacing `.` with `_`
/// (`sale.line` -> `sale_line`) unless registered explicitly.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    tables: BTreeMap<String, String>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under its conventional table name.
    pub fn register(&mut self, model: &str) -> RegistryResult<&mut Self> {
        let table = table_name_for(model)?;
        self.register_table(model, table)
    }

    /// Register a model under an explicit table name.
    pub fn register_table(
        &mut self,
        model: &str,
        table: impl Into<String>,
    ) -> RegistryResult<&mut Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(RegistryError::invalid_model_name(format!(
                "{model} (table '{table}')"
            )));
        }
        if let Some(existing) = self.tables.get(model) {
            if existing != &table {
                return Err(RegistryError::Conflict {
                    model: model.to_string(),
                    existing: existing.clone(),
                    requested: table,
                });
            }
            return Ok(self);
        }
        self.tables.insert(model.to_string(), table);
        Ok(self)
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl EntityRegistry for StaticRegistry {
    fn resolve(&self, model: &str) -> Option<TableRef> {
        self.tables
            .get(model)
            .map(|table| TableRef::new(model, table.clone()))
    }
}

/// Conventional table name of a model (`party.address` -> `party_address`).
pub fn table_name_for(model: &str) -> RegistryResult<String> {
    if model.is_empty() || model.split('.').any(|segment| !is_identifier(segment)) {
        return Err(RegistryError::invalid_model_name(model));
    }
    Ok(model.replace('.', "_"))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
