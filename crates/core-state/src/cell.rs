//! Per-record synchronization.
//!
//! Each stored record lives in its own `RecordCell`. Two locks, two roles:
//!
//! * `state` (`RwLock`): guards the record value. Readers take it only long
//!   enough to clone, so a reader never observes a half-applied mutation and
//!   never waits on event fan-out.
//! * `writer` (`ReentrantMutex`): serializes mutators of this record *and*
//!   the event publication that follows each commit. A mutator holds it from
//!   before the write until its `Commit` guard drops, which gives one total
//!   order per URI over (mutation, event) pairs. It is reentrant so a handler
//!   running on the publishing thread may mutate the same record again.
//!
//! Readers never touch `writer`; unrelated records never share either lock.

use core_model::{BridgeError, BridgeResult, ComponentRecord};
use core_uri::Uri;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Internal registration identity. Re-registering a URI with the same
/// identity is an update; a different identity is a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u64);

#[derive(Debug)]
pub struct RecordCell {
    id: RwLock<ComponentId>,
    uri: Uri,
    state: RwLock<ComponentRecord>,
    writer: ReentrantMutex<()>,
    revision: AtomicU64,
    retired: AtomicBool,
}

/// A committed mutation. Holding it keeps the record's writer lock so the
/// caller can publish the matching event before any later mutation of the
/// same record commits.
pub struct Commit<'a, R> {
    pub output: R,
    pub record: ComponentRecord,
    pub revision: u64,
    _writer: ReentrantMutexGuard<'a, ()>,
}

impl RecordCell {
    pub(crate) fn new(id: ComponentId, record: ComponentRecord) -> Self {
        Self {
            id: RwLock::new(id),
            uri: record.uri.clone(),
            state: RwLock::new(record),
            writer: ReentrantMutex::new(()),
            revision: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Stored key. Immutable for the lifetime of the cell.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn id(&self) -> ComponentId {
        *self.id.read()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Point-in-time copy of the record.
    pub fn snapshot(&self) -> ComponentRecord {
        self.state.read().clone()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Apply `f` atomically. `f` works on a scratch copy; the stored record is
    /// replaced only when `f` succeeds, so a failed mutation leaves no trace.
    /// The record's URI cannot be changed through this path.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut ComponentRecord) -> BridgeResult<R>,
    ) -> BridgeResult<Commit<'_, R>> {
        let writer = self.writer.lock();
        if self.is_retired() {
            return Err(BridgeError::not_found(&self.uri));
        }
        let mut scratch = self.state.read().clone();
        let output = f(&mut scratch)?;
        scratch.uri = self.uri.clone();
        let record = {
            let mut state = self.state.write();
            *state = scratch;
            state.clone()
        };
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(target: "store", uri = %self.uri, revision, "record_committed");
        Ok(Commit {
            output,
            record,
            revision,
            _writer: writer,
        })
    }

    /// Replace the whole record (idempotent re-registration).
    pub(crate) fn replace(&self, id: ComponentId, record: ComponentRecord) -> BridgeResult<()> {
        self.mutate(|current| {
            *current = record;
            Ok(())
        })?;
        *self.id.write() = id;
        Ok(())
    }

    /// Mark removed. Waits for an in-flight mutation (and its fan-out) to finish.
    pub(crate) fn retire(&self) -> ComponentRecord {
        let _writer = self.writer.lock();
        self.retired.store(true, Ordering::Release);
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{ActionState, ErrorKind};
    use core_uri::Category;

    fn cell() -> RecordCell {
        RecordCell::new(
            ComponentId(1),
            ComponentRecord::action(
                Uri::new(Category::Actions, "p", "a"),
                ActionState::toggle("A", false),
            ),
        )
    }

    #[test]
    fn failed_mutation_leaves_record_untouched() {
        let c = cell();
        let before = c.snapshot();
        let res = c.mutate(|r| {
            r.enabled = false;
            Err::<(), _>(BridgeError::invalid_value(&r.uri, "nope"))
        });
        assert!(res.is_err());
        assert_eq!(c.snapshot(), before);
        assert_eq!(c.revision(), 0);
    }

    #[test]
    fn commit_exposes_new_state_and_revision() {
        let c = cell();
        let commit = c
            .mutate(|r| Ok(r.as_action_mut().and_then(|a| a.apply_activation())))
            .unwrap();
        assert_eq!(commit.output, Some(true));
        assert_eq!(commit.revision, 1);
        assert!(commit.record.as_action().unwrap().checked);
    }

    #[test]
    fn nested_mutation_on_same_thread_does_not_deadlock() {
        let c = cell();
        let outer = c.mutate(|_| Ok(())).unwrap();
        let inner = c.mutate(|r| {
            r.visible = false;
            Ok(())
        });
        assert!(inner.is_ok());
        drop(inner);
        drop(outer);
        assert!(!c.snapshot().visible);
    }

    #[test]
    fn retired_cell_rejects_mutation() {
        let c = cell();
        c.retire();
        let err = c.mutate(|_| Ok(())).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn uri_cannot_be_rewritten() {
        let c = cell();
        drop(c.mutate(|r| {
            r.uri = Uri::new(Category::Actions, "q", "z");
            Ok(())
        }));
        assert_eq!(c.snapshot().uri, Uri::new(Category::Actions, "p", "a"));
    }
}
