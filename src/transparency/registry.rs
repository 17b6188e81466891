//! Sorted, fixed-capacity trap registry
//!
//! Entries stay strictly ascending by key so lookups are a binary search.
//! The registry does no locking of its own; the coordinator serializes
//! every call behind its lock.

use thiserror::Error;

/// Default number of threads that can wait for a syscall-return trap at once
pub const MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Trap registry is full ({capacity} entries)")]
    Full { capacity: usize },
}

/// Composite key: process id in the high half, thread id in the low half
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TrapKey(u64);

impl TrapKey {
    pub fn new(process_id: u32, thread_id: u32) -> Self {
        Self(((process_id as u64) << 32) | thread_id as u64)
    }

    pub fn process_id(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn thread_id(self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Optional caller parameters, copied verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapParams {
    pub optional: [u64; 4],
}

impl TrapParams {
    pub fn new(p1: u64, p2: u64, p3: u64, p4: u64) -> Self {
        Self {
            optional: [p1, p2, p3, p4],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapEntry {
    pub key: TrapKey,
    pub context: u64,
    pub params: TrapParams,
}

#[derive(Debug)]
pub struct TrapRegistry {
    entries: Box<[TrapEntry]>,
    count: usize,
}

impl TrapRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAXIMUM_NUMBER_OF_THREAD_INFORMATION_FOR_TRANSPARENT_MODE_TRAPS)
    }

    /// Preallocate every slot; the registry never grows
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: vec![TrapEntry::default(); capacity].into_boxed_slice(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Live entries, ascending by key
    pub fn entries(&self) -> &[TrapEntry] {
        &self.entries[..self.count]
    }

    pub fn get(&self, index: usize) -> Option<&TrapEntry> {
        self.entries().get(index)
    }

    /// Index of `key`, if present
    pub fn search(&self, key: TrapKey) -> Option<usize> {
        self.entries().binary_search_by(|e| e.key.cmp(&key)).ok()
    }

    /// Insert in key order
    ///
    /// An existing key is left untouched and its index returned.
    pub fn insert(
        &mut self,
        key: TrapKey,
        context: u64,
        params: TrapParams,
    ) -> Result<usize, RegistryError> {
        let index = match self.entries().binary_search_by(|e| e.key.cmp(&key)) {
            Ok(existing) => return Ok(existing),
            Err(position) => position,
        };

        if self.count == self.capacity() {
            return Err(RegistryError::Full {
                capacity: self.capacity(),
            });
        }

        // shift the tail right by one
        self.entries.copy_within(index..self.count, index + 1);
        self.entries[index] = TrapEntry {
            key,
            context,
            params,
        };
        self.count += 1;
        Ok(index)
    }

    /// Remove the entry at `index` (from a prior [`search`](Self::search))
    ///
    /// Out-of-range indices are ignored.
    pub fn delete(&mut self, index: usize) {
        if index >= self.count {
            return;
        }
        self.entries.copy_within(index + 1..self.count, index);
        self.count -= 1;
        self.entries[self.count] = TrapEntry::default();
    }
}

impl Default for TrapRegistry {
    fn default() -> Self {
        Self::new()
    }
}
