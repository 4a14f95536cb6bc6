//! Address space identifiers.

use alloc::sync::Arc;
use core::fmt;

use crate::{AllocError, MemoryManager, bitmap::Bitmap};

/// Identifies a live address space. Unique among the spaces sharing one [`MemoryManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(usize);

impl SpaceId {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded pool of address space identifiers.
pub struct SpaceIdPool {
    ids: Bitmap,
}

impl SpaceIdPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: Bitmap::new(capacity),
        }
    }

    /// Claims the lowest free identifier.
    pub fn find(&mut self) -> Result<SpaceId, AllocError> {
        self.ids
            .find()
            .map(SpaceId)
            .ok_or(AllocError::OutOfSpaceIds)
    }

    /// Returns an identifier to the pool.
    ///
    /// # Panics
    /// Panics if the identifier was not claimed.
    pub fn clear(&mut self, id: SpaceId) {
        self.ids.clear(id.0);
    }

    pub fn is_live(&self, id: SpaceId) -> bool {
        id.0 < self.ids.capacity() && self.ids.test(id.0)
    }

    pub fn available(&self) -> usize {
        self.ids.num_clear()
    }
}

/// Owns a claimed [`SpaceId`] and returns it to the pool when dropped.
pub struct SpaceIdHandle {
    id: SpaceId,
    memory: Arc<MemoryManager>,
}

impl SpaceIdHandle {
    /// Claims an identifier from the manager's pool.
    pub fn claim(memory: &Arc<MemoryManager>) -> Result<Self, AllocError> {
        let id = memory.space_ids().lock().find()?;
        Ok(Self {
            id,
            memory: Arc::clone(memory),
        })
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }
}

impl Drop for SpaceIdHandle {
    fn drop(&mut self) {
        log::trace!("releasing space id {}", self.id);
        self.memory.space_ids().lock().clear(self.id);
    }
}
