//! Indexable, lazily-mapped snapshot of query results.

use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

use record_store::{RecordHandle, RecordId};

use crate::queryable::Queryable;
use crate::{QueryError, Result};

struct Snapshot {
    handles: Vec<RecordHandle>,
    /// `(id, revision)` of each handle at capture time.
    fingerprint: Vec<(RecordId, u64)>,
}

/// A read-only, ordered view over one snapshot of record handles.
///
/// The set and order of handles never change once the view exists. Each
/// index access maps its handle through [`Queryable::from_record`] afresh,
/// so two reads of the same index can differ if the store updated that
/// record's fields in place between them.
///
/// Cloning is cheap; clones share the snapshot.
pub struct QueryResults<T> {
    snapshot: Arc<Snapshot>,
    _projection: PhantomData<fn() -> T>,
}

impl<T: Queryable> QueryResults<T> {
    /// An empty view.
    pub fn empty() -> Self {
        Self::from_handles(Vec::new())
    }

    /// Captures a snapshot of `handles`, in order.
    pub fn from_handles(handles: Vec<RecordHandle>) -> Self {
        let fingerprint = handles.iter().map(|h| (h.id(), h.revision())).collect();
        Self {
            snapshot: Arc::new(Snapshot {
                handles,
                fingerprint,
            }),
            _projection: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.handles.is_empty()
    }

    /// Projects the record at `index`.
    ///
    /// Fails with [`QueryError::IndexOutOfBounds`] for `index >= len()`.
    pub fn get(&self, index: usize) -> Result<T> {
        let handle = self
            .snapshot
            .handles
            .get(index)
            .ok_or(QueryError::IndexOutOfBounds {
                index,
                len: self.len(),
            })?;
        Ok(project(handle))
    }

    /// Iterates over projected values, mapping each one on demand.
    pub fn iter(&self) -> ResultsIter<'_, T> {
        ResultsIter {
            handles: self.snapshot.handles.iter(),
            _projection: PhantomData,
        }
    }

    /// Projects every record.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// The raw handles, in snapshot order.
    pub fn handles(&self) -> &[RecordHandle] {
        &self.snapshot.handles
    }

    /// True when both views captured the same records, in the same order,
    /// at the same content revisions.
    pub fn same_content(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.snapshot, &other.snapshot)
            || self.snapshot.fingerprint == other.snapshot.fingerprint
    }
}

fn project<T: Queryable>(handle: &RecordHandle) -> T {
    tracing::trace!(record_id = %handle.id(), "mapped record");
    T::from_record(handle)
}

impl<T> Clone for QueryResults<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot: Arc::clone(&self.snapshot),
            _projection: PhantomData,
        }
    }
}

impl<T: Queryable> Default for QueryResults<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for QueryResults<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults")
            .field("count", &self.snapshot.handles.len())
            .field(
                "records",
                &self
                    .snapshot
                    .fingerprint
                    .iter()
                    .map(|(id, _)| id)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<'a, T: Queryable> IntoIterator for &'a QueryResults<T> {
    type Item = T;
    type IntoIter = ResultsIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over projected values of a [`QueryResults`].
pub struct ResultsIter<'a, T> {
    handles: std::slice::Iter<'a, RecordHandle>,
    _projection: PhantomData<fn() -> T>,
}

impl<T: Queryable> Iterator for ResultsIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.handles.next().map(project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.handles.size_hint()
    }
}

impl<T: Queryable> DoubleEndedIterator for ResultsIter<'_, T> {
    fn next_back(&mut self) -> Option<T> {
        self.handles.next_back().map(project)
    }
}

impl<T: Queryable> ExactSizeIterator for ResultsIter<'_, T> {}

impl<T: Queryable> FusedIterator for ResultsIter<'_, T> {}
