// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Pending upload state: the metadata and fragments received so far.

use std::collections::BTreeMap;

use update_protocol::{Fragment, Metadata};

/// Keyed fragment container of the in-flight upload.
///
/// Fragments are indexed by their number so any arrival order is
/// tolerated, and iterated in ascending number order during install. The
/// capacity is bounded by the largest firmware the device accepts; a
/// duplicate number replaces the earlier fragment.
pub(crate) struct PendingUpload {
    metadata: Option<Metadata>,
    fragments: BTreeMap<u32, Fragment>,
    max_fragments: usize,
}

impl PendingUpload {
    pub(crate) fn new(max_fragments: usize) -> Self {
        PendingUpload {
            metadata: None,
            fragments: BTreeMap::new(),
            max_fragments,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.metadata = None;
        self.fragments.clear();
    }

    pub(crate) fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = Some(metadata);
    }

    pub(crate) fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn fragment(&self, number: u32) -> Option<&Fragment> {
        self.fragments.get(&number)
    }

    /// Insert a fragment, refusing growth beyond the capacity bound.
    pub(crate) fn insert(&mut self, fragment: Fragment) -> Result<(), ()> {
        if !self.fragments.contains_key(&fragment.number)
            && self.fragments.len() >= self.max_fragments
        {
            return Err(());
        }
        self.fragments.insert(fragment.number, fragment);
        Ok(())
    }

    pub(crate) fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Fragments in ascending number order.
    pub(crate) fn fragments(&self) -> impl Iterator<Item = (u32, &Fragment)> {
        self.fragments.iter().map(|(&number, fragment)| (number, fragment))
    }
}
