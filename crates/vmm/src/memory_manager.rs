//! Machine-wide paging state shared by every address space.

use spin::Mutex;

use crate::{ConfigError, FrameAllocator, FrameNumber, SpaceIdPool, VmConfig, config::MAX_SPACES};

/// Owns the physical frame allocator and the address space identifier pool of one machine.
///
/// Address spaces keep an `Arc<MemoryManager>` so they can return their frames and
/// identifier when dropped. Several managers may coexist, one per simulated machine.
///
/// The locks only make the manager shareable. Callers are still expected to serialize
/// address space creation, destruction and fault handling themselves.
pub struct MemoryManager {
    config: VmConfig,
    frames: Mutex<FrameAllocator>,
    space_ids: Mutex<SpaceIdPool>,
}

impl MemoryManager {
    /// Creates a manager for a machine described by `config`.
    pub fn new(config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        log::debug!(
            "memory manager: {} frames of {} bytes, {} resident pages per space, {} replacement",
            config.num_phys_pages,
            crate::PAGE_SIZE,
            config.available_pages,
            config.policy
        );

        Ok(Self {
            config,
            frames: Mutex::new(FrameAllocator::new(config.num_phys_pages)),
            space_ids: Mutex::new(SpaceIdPool::new(MAX_SPACES)),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Returns the frame allocator.
    pub fn frames(&self) -> &Mutex<FrameAllocator> {
        &self.frames
    }

    /// Returns the address space identifier pool.
    pub fn space_ids(&self) -> &Mutex<SpaceIdPool> {
        &self.space_ids
    }

    /// Returns the number of unclaimed frames.
    pub fn free_frames(&self) -> usize {
        self.frames.lock().free_frames()
    }

    /// Returns true if the frame is claimed by some address space.
    pub fn is_claimed(&self, frame: FrameNumber) -> bool {
        self.frames.lock().is_claimed(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_allocator_from_config() {
        let memory = MemoryManager::new(VmConfig::default().with_phys_pages(8)).unwrap();
        assert_eq!(memory.free_frames(), 8);
        assert_eq!(memory.frames().lock().total_frames(), 8);
        assert_eq!(memory.space_ids().lock().available(), MAX_SPACES);
    }

    #[test]
    fn rejects_invalid_config() {
        let result = MemoryManager::new(VmConfig::default().with_available_pages(0));
        assert!(matches!(result, Err(ConfigError::ZeroAvailablePages)));
    }
}
