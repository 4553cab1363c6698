//! Append-only diff log with named markers.
//!
//! A marker remembers the log length at the time it was set. `diffs_since`
//! returns an owned snapshot of the tail after a marker, so a snapshot taken
//! before `reset` stays intact after it.

use std::collections::HashMap;

use pcx_types::ObjectId;

use crate::error::{DiffError, DiffResult};
use crate::graph_diff::{CompoundDiff, GraphDiff};

/// Per-context ordered diff sequence.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    diffs: Vec<GraphDiff>,
    markers: HashMap<String, usize>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diff. Compounds are flattened so the log only holds atomic
    /// diffs; empty compounds record nothing.
    pub fn record(&mut self, diff: GraphDiff) {
        diff.flatten_into(&mut self.diffs);
    }

    /// Remember the current log length under `tag`, replacing any earlier
    /// position for the same tag.
    pub fn mark(&mut self, tag: &str) {
        self.markers.insert(tag.to_string(), self.diffs.len());
    }

    pub fn has_marker(&self, tag: &str) -> bool {
        self.markers.contains_key(tag)
    }

    /// Snapshot of every diff recorded after `tag` was set, in insertion order.
    pub fn diffs_since(&self, tag: &str) -> DiffResult<CompoundDiff> {
        let start = self.position(tag)?;
        Ok(CompoundDiff::from_diffs(self.diffs[start..].to_vec()))
    }

    /// Number of diffs recorded after `tag` was set.
    pub fn size_since(&self, tag: &str) -> DiffResult<usize> {
        let start = self.position(tag)?;
        Ok(self.diffs.len() - start)
    }

    /// Snapshot of the whole log.
    pub fn diffs(&self) -> CompoundDiff {
        CompoundDiff::from_diffs(self.diffs.clone())
    }

    pub fn size(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Remove every diff whose subject or arc target is `id`. Markers keep
    /// pointing at the same surviving diffs.
    pub fn unregister(&mut self, id: &ObjectId) {
        let mut removed_before = vec![0usize; self.diffs.len() + 1];
        let mut removed = 0;
        let mut kept = Vec::with_capacity(self.diffs.len());

        for (index, diff) in std::mem::take(&mut self.diffs).into_iter().enumerate() {
            removed_before[index] = removed;
            if diff.references(id) {
                removed += 1;
            } else {
                kept.push(diff);
            }
        }
        let len = removed_before.len();
        removed_before[len - 1] = removed;

        for position in self.markers.values_mut() {
            let index = (*position).min(len - 1);
            *position = index - removed_before[index];
        }
        self.diffs = kept;
    }

    /// Rewrite `old` to `new` in every recorded diff.
    pub fn replace_id(&mut self, old: &ObjectId, new: &ObjectId) {
        for diff in &mut self.diffs {
            diff.replace_id(old, new);
        }
    }

    /// Remove and return every diff recorded after `tag`. Markers past the
    /// new end are pulled back to it.
    pub fn rollback_to(&mut self, tag: &str) -> DiffResult<CompoundDiff> {
        let start = self.position(tag)?;
        let tail = self.diffs.split_off(start);
        for position in self.markers.values_mut() {
            *position = (*position).min(start);
        }
        Ok(CompoundDiff::from_diffs(tail))
    }

    /// Start over with a fresh log and no markers.
    pub fn reset(&mut self) {
        self.diffs = Vec::new();
        self.markers = HashMap::new();
    }

    fn position(&self, tag: &str) -> DiffResult<usize> {
        self.markers
            .get(tag)
            .map(|&position| position.min(self.diffs.len()))
            .ok_or_else(|| DiffError::UnknownMarker(tag.to_string()))
    }
}
