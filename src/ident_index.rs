// Copyright 2024 Cornell University
// released under BSD 3-Clause License
//
// Identifier index (spec.md §4.5): dense-array fast path with hash-map
// fallback for sparse handle sets. No direct teacher analogue; the
// array-vs-map selection is a standard sparse-key technique applied to the
// handle numbering spec.md §3 defines for text and binary handles alike.

use std::collections::HashMap;

/// Entries above this count fall back to a hash map rather than a
/// direct-mapped array (spec.md §4.5, "16 Mi entries").
const MAX_DIRECT_MAP_ENTRIES: u64 = 16 * 1024 * 1024;

enum Storage<V> {
    Array { min: u64, slots: Vec<Option<V>> },
    Map(HashMap<u64, V>),
}

/// Maps integer handles to writer references (or any `V`), choosing a
/// direct-mapped array when the handle range is small and dense, and a
/// hash map otherwise.
pub struct IdentIndex<V> {
    storage: Storage<V>,
}

/// Which storage strategy was selected; logged once per decode per
/// spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    DirectArray,
    HashMap,
}

impl<V> IdentIndex<V> {
    /// Builds an index for the given set of handles. `min`/`max` must
    /// bound every handle that will later be inserted or looked up.
    pub fn new(min: u64, max: u64) -> (Self, IndexKind) {
        if max >= min {
            let span = max - min + 1;
            if span <= MAX_DIRECT_MAP_ENTRIES {
                let mut slots = Vec::with_capacity(span as usize);
                slots.resize_with(span as usize, || None);
                return (
                    Self {
                        storage: Storage::Array { min, slots },
                    },
                    IndexKind::DirectArray,
                );
            }
        }
        (
            Self {
                storage: Storage::Map(HashMap::new()),
            },
            IndexKind::HashMap,
        )
    }

    /// Builds an index directly from an iterator of handles (convenience
    /// wrapper around computing min/max then calling [`Self::new`]).
    pub fn from_handles(handles: impl IntoIterator<Item = u64>) -> (Self, IndexKind) {
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut any = false;
        for h in handles {
            any = true;
            min = min.min(h);
            max = max.max(h);
        }
        if !any {
            return (
                Self {
                    storage: Storage::Map(HashMap::new()),
                },
                IndexKind::HashMap,
            );
        }
        Self::new(min, max)
    }

    pub fn insert(&mut self, handle: u64, value: V) {
        match &mut self.storage {
            Storage::Array { min, slots } => {
                if handle >= *min && ((handle - *min) as usize) < slots.len() {
                    slots[(handle - *min) as usize] = Some(value);
                    return;
                }
                debug_assert!(
                    false,
                    "handle {handle} out of the precomputed array bounds"
                );
            }
            Storage::Map(map) => {
                map.insert(handle, value);
            }
        }
    }

    pub fn get(&self, handle: u64) -> Option<&V> {
        match &self.storage {
            Storage::Array { min, slots } => {
                if handle < *min {
                    return None;
                }
                slots
                    .get((handle - *min) as usize)
                    .and_then(|slot| slot.as_ref())
            }
            Storage::Map(map) => map.get(&handle),
        }
    }

    pub fn get_mut(&mut self, handle: u64) -> Option<&mut V> {
        match &mut self.storage {
            Storage::Array { min, slots } => {
                if handle < *min {
                    return None;
                }
                slots
                    .get_mut((handle - *min) as usize)
                    .and_then(|slot| slot.as_mut())
            }
            Storage::Map(map) => map.get_mut(&handle),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match &self.storage {
            Storage::Array { .. } => IndexKind::DirectArray,
            Storage::Map(_) => IndexKind::HashMap,
        }
    }
}
