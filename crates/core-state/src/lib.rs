//! Component Store: the single owner of every component record.
//!
//! Layout:
//! * One `Partition` per `Category`. A partition is an insertion-ordered
//!   index (`IndexMap<Uri, Arc<RecordCell>>`) behind its own `RwLock`.
//! * Each record lives in a `RecordCell` with its own locks (see `cell`).
//!
//! Locking rules (must hold for every public call):
//! * A partition lock is held only to look up, insert, or remove cell
//!   handles. It is never held while a record lock is taken, and never
//!   across caller code. Record reads and writes therefore never block
//!   operations on other URIs.
//! * Mutations go through `RecordCell::mutate`, which serializes writers of
//!   one record and keeps the order of (mutation, event) pairs per URI.
//!
//! Resolution rules:
//! * `get(uri)` is exact key lookup.
//! * `resolve(query)` returns the record stored under exactly `query` when
//!   one exists; otherwise the query must match exactly one record
//!   (`NotFound` / `AmbiguousUri`).
//! * `find(query)` returns every match in insertion order. A query without a
//!   category scans partitions in `Category::ALL` order.
//!
//! Identity rules:
//! * `upsert(id, record)`: inserting a URI already held by a different
//!   `ComponentId` fails with `DuplicateUri`; the same id updates in place.
//! * `replace(record)`: insert-or-replace regardless of identity (widget
//!   registration semantics).

use core_model::{BridgeError, BridgeResult, ComponentRecord};
use core_uri::{Category, Uri};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

pub mod cell;

pub use cell::{Commit, ComponentId, RecordCell};

/// Shared handle to a stored record.
pub type RecordHandle = Arc<RecordCell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id")]
pub enum UpsertOutcome {
    Inserted(ComponentId),
    Updated(ComponentId),
}

impl UpsertOutcome {
    pub fn id(&self) -> ComponentId {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

#[derive(Debug, Default)]
struct Partition {
    index: RwLock<IndexMap<Uri, RecordHandle>>,
}

impl Partition {
    fn handles(&self) -> Vec<RecordHandle> {
        self.index.read().values().cloned().collect()
    }
}

#[derive(Clone, Copy)]
enum IdentityPolicy {
    Strict(ComponentId),
    Replace,
}

#[derive(Debug)]
pub struct ComponentStore {
    partitions: [Partition; 5],
    next_id: AtomicU64,
}

impl Default for ComponentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentStore {
    pub fn new() -> Self {
        Self {
            partitions: Default::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fresh registration identity.
    pub fn allocate_id(&self) -> ComponentId {
        ComponentId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn partition(&self, category: Category) -> &Partition {
        let idx = match category {
            Category::Actions => 0,
            Category::Settings => 1,
            Category::Widgets => 2,
            Category::Tools => 3,
            Category::Panels => 4,
        };
        &self.partitions[idx]
    }

    fn partitions_for<'a>(&'a self, query: &Uri) -> Vec<&'a Partition> {
        match query.category {
            Some(c) => vec![self.partition(c)],
            None => Category::ALL.iter().map(|c| self.partition(*c)).collect(),
        }
    }

    /// Insert or idempotently update a record registered under `id`.
    pub fn upsert(&self, id: ComponentId, record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        self.write_record(IdentityPolicy::Strict(id), record)
    }

    /// Insert or replace a record regardless of which identity held the URI.
    pub fn replace(&self, record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        self.write_record(IdentityPolicy::Replace, record)
    }

    fn write_record(
        &self,
        policy: IdentityPolicy,
        record: ComponentRecord,
    ) -> BridgeResult<UpsertOutcome> {
        record.validate()?;
        let uri = record.uri.clone();
        let category = uri.category.unwrap_or(Category::Actions);
        let partition = self.partition(category);
        loop {
            let existing = {
                let mut index = partition.index.write();
                match index.get(&uri) {
                    Some(cell) => cell.clone(),
                    None => {
                        let id = match policy {
                            IdentityPolicy::Strict(id) => id,
                            IdentityPolicy::Replace => self.allocate_id(),
                        };
                        index.insert(uri.clone(), Arc::new(RecordCell::new(id, record)));
                        debug!(target: "store", %uri, id = id.0, "record_inserted");
                        return Ok(UpsertOutcome::Inserted(id));
                    }
                }
            };
            let id = match policy {
                IdentityPolicy::Strict(id) if existing.id() != id => {
                    debug!(target: "store", %uri, held_by = existing.id().0, requested = id.0, "duplicate_uri");
                    return Err(BridgeError::DuplicateUri { uri });
                }
                IdentityPolicy::Strict(id) => id,
                IdentityPolicy::Replace => existing.id(),
            };
            // Record lock taken outside the partition lock. A concurrent removal
            // retires the cell; loop and insert a fresh one instead.
            match existing.replace(id, record.clone()) {
                Ok(()) => {
                    debug!(target: "store", %uri, id = id.0, "record_updated");
                    return Ok(UpsertOutcome::Updated(id));
                }
                Err(_) if existing.is_retired() => {
                    trace!(target: "store", %uri, "upsert_raced_removal");
                    let mut index = partition.index.write();
                    if index.get(&uri).is_some_and(|c| Arc::ptr_eq(c, &existing)) {
                        index.shift_remove(&uri);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove the record stored under exactly `uri`.
    pub fn remove(&self, uri: &Uri) -> Option<ComponentRecord> {
        let category = uri.category?;
        let cell = self.partition(category).index.write().shift_remove(uri)?;
        let record = cell.retire();
        debug!(target: "store", %uri, "record_removed");
        Some(record)
    }

    /// Remove every record matching `query`, returning them in insertion order.
    pub fn remove_matching(&self, query: &Uri) -> Vec<ComponentRecord> {
        let mut removed_cells = Vec::new();
        for partition in self.partitions_for(query) {
            let mut index = partition.index.write();
            let doomed: Vec<Uri> = index
                .keys()
                .filter(|stored| query.matches(stored))
                .cloned()
                .collect();
            for uri in doomed {
                if let Some(cell) = index.shift_remove(&uri) {
                    removed_cells.push(cell);
                }
            }
        }
        let removed: Vec<ComponentRecord> = removed_cells.iter().map(|c| c.retire()).collect();
        if !removed.is_empty() {
            debug!(target: "store", %query, count = removed.len(), "records_removed");
        }
        removed
    }

    /// Bulk removal for a plugin unload sweep.
    pub fn remove_plugin(&self, plugin_id: &str) -> Vec<ComponentRecord> {
        self.remove_matching(&Uri::any().with_plugin_id(plugin_id))
    }

    /// Exact key lookup.
    pub fn get(&self, uri: &Uri) -> BridgeResult<ComponentRecord> {
        self.handle(uri)
            .map(|cell| cell.snapshot())
            .ok_or_else(|| BridgeError::not_found(uri))
    }

    /// Exact key lookup returning the cell handle.
    pub fn handle(&self, uri: &Uri) -> Option<RecordHandle> {
        let category = uri.category?;
        self.partition(category).index.read().get(uri).cloned()
    }

    /// Every handle matching `query`, insertion order.
    pub fn find_handles(&self, query: &Uri) -> Vec<RecordHandle> {
        self.find_handles_in(query, &Category::ALL)
    }

    /// `find_handles` restricted to `categories`. A query naming a category
    /// outside the set matches nothing.
    pub fn find_handles_in(&self, query: &Uri, categories: &[Category]) -> Vec<RecordHandle> {
        let scope: Vec<Category> = match query.category {
            Some(c) if categories.contains(&c) => vec![c],
            Some(_) => Vec::new(),
            None => categories.to_vec(),
        };
        let mut out = Vec::new();
        for category in scope {
            out.extend(
                self.partition(category)
                    .handles()
                    .into_iter()
                    .filter(|cell| query.matches(cell.uri())),
            );
        }
        trace!(target: "store", %query, matched = out.len(), "find");
        out
    }

    /// Point-in-time snapshot of every record matching `query`.
    pub fn find(&self, query: &Uri) -> Vec<ComponentRecord> {
        self.find_in(query, &Category::ALL)
    }

    pub fn find_in(&self, query: &Uri, categories: &[Category]) -> Vec<ComponentRecord> {
        self.find_handles_in(query, categories)
            .into_iter()
            .map(|cell| cell.snapshot())
            .collect()
    }

    /// Resolve `query` to exactly one record handle.
    pub fn resolve(&self, query: &Uri) -> BridgeResult<RecordHandle> {
        self.resolve_in(query, &Category::ALL)
    }

    /// `resolve` restricted to `categories`.
    pub fn resolve_in(&self, query: &Uri, categories: &[Category]) -> BridgeResult<RecordHandle> {
        if query.is_resolved() {
            if let Some(cell) = self.handle(query) {
                if cell.uri().category.is_some_and(|c| categories.contains(&c)) {
                    return Ok(cell);
                }
            }
        }
        let mut matches = self.find_handles_in(query, categories);
        match matches.len() {
            0 => Err(BridgeError::not_found(query)),
            1 => Ok(matches.remove(0)),
            count => Err(BridgeError::AmbiguousUri {
                query: query.clone(),
                count,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.index.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, category: Category) -> usize {
        self.partition(category).index.read().len()
    }
}
