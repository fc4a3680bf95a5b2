// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Protection Catalog
//!
//! Explicit registry of [`ProtectionKind`] implementations. The catalog is
//! built once at startup (see
//! `crate::infrastructure::protections::register_builtin_kinds`) and then
//! shared read-only behind an `Arc`.
//!
//! Kinds are kept ordered by code: that order is the evaluation order of the
//! authorization engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::domain::protection::{ProtectionCode, ProtectionKind, ProtectionType};
use crate::domain::repository::KindRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("protection kind '{0}' is already registered")]
    DuplicateKind(ProtectionCode),

    #[error("unknown protection kind '{0}'")]
    UnknownKind(ProtectionCode),

    #[error("invalid protection code '{0}'")]
    InvalidCode(ProtectionCode),
}

/// Result of comparing the persisted kind table with the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Registered kinds not yet persisted.
    pub missing_in_store: Vec<ProtectionCode>,
    /// Persisted kinds without an implementation. Never deleted.
    pub orphaned: Vec<ProtectionCode>,
    /// Persisted kinds whose stored ptype differs from the implementation.
    pub ptype_changed: Vec<ProtectionCode>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.orphaned.is_empty() && self.ptype_changed.is_empty()
    }
}

#[derive(Default)]
pub struct ProtectionCatalog {
    kinds: BTreeMap<ProtectionCode, Arc<dyn ProtectionKind>>,
}

impl std::fmt::Debug for ProtectionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionCatalog")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProtectionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: Arc<dyn ProtectionKind>) -> Result<(), CatalogError> {
        let code = kind.code();
        if !code.is_valid() {
            return Err(CatalogError::InvalidCode(code));
        }
        if self.kinds.contains_key(&code) {
            return Err(CatalogError::DuplicateKind(code));
        }
        self.kinds.insert(code, kind);
        Ok(())
    }

    pub fn get(&self, code: &ProtectionCode) -> Result<Arc<dyn ProtectionKind>, CatalogError> {
        self.kinds
            .get(code)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownKind(code.clone()))
    }

    pub fn contains(&self, code: &ProtectionCode) -> bool {
        self.kinds.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Kinds whose ptype contains every flag of `filter`, ordered by code.
    /// The iterator borrows the catalog and can be recreated at will.
    pub fn list(&self, filter: ProtectionType) -> impl Iterator<Item = &Arc<dyn ProtectionKind>> + '_ {
        self.kinds
            .values()
            .filter(move |kind| kind.ptype().contains(filter))
    }

    pub fn records(&self) -> Vec<KindRecord> {
        self.kinds
            .values()
            .map(|kind| KindRecord {
                code: kind.code(),
                ptype: kind.ptype(),
            })
            .collect()
    }

    /// Compare against the persisted kind table. Orphans are reported and
    /// logged, never removed.
    pub fn reconcile(&self, persisted: &[KindRecord]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for record in persisted {
            match self.kinds.get(&record.code) {
                None => {
                    warn!(code = %record.code, "Persisted protection kind has no implementation");
                    report.orphaned.push(record.code.clone());
                }
                Some(kind) if kind.ptype() != record.ptype => {
                    warn!(
                        code = %record.code,
                        stored = %record.ptype,
                        registered = %kind.ptype(),
                        "Protection kind capabilities changed"
                    );
                    report.ptype_changed.push(record.code.clone());
                }
                Some(_) => {}
            }
        }
        for code in self.kinds.keys() {
            if !persisted.iter().any(|record| &record.code == code) {
                report.missing_in_store.push(code.clone());
            }
        }
        report
    }
}
