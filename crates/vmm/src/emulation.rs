//! Software emulation of the machine and filesystem for testing and host tools.
//!
//! This module provides host-side implementations of [`Machine`] and [`FileSystem`] so the
//! paging code can run without the CPU simulator: main memory is a plain buffer and files
//! live in memory.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use spin::Mutex;

use crate::{
    FileSystem, Machine, OpenFile, PAGE_SIZE, Register, TranslationContext,
    machine::NUM_TOTAL_REGS,
};

/// Emulated machine with `num_frames` frames of main memory.
pub struct EmulatedMachine {
    /// The underlying memory buffer.
    memory: Vec<u8>,
    registers: [u32; NUM_TOTAL_REGS],
    translation: Option<TranslationContext>,
}

impl EmulatedMachine {
    /// Creates a machine with zeroed memory and registers.
    pub fn new(num_frames: usize) -> Self {
        Self {
            memory: vec![0u8; num_frames * PAGE_SIZE],
            registers: [0; NUM_TOTAL_REGS],
            translation: None,
        }
    }

    /// Returns the translation context installed by the last context switch.
    pub fn translation(&self) -> Option<TranslationContext> {
        self.translation
    }
}

impl Machine for EmulatedMachine {
    fn main_memory(&self) -> &[u8] {
        &self.memory
    }

    fn main_memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn read_register(&self, register: Register) -> u32 {
        self.registers[register.index()]
    }

    fn write_register(&mut self, register: Register, value: u32) {
        self.registers[register.index()] = value;
    }

    fn install_translation(&mut self, context: TranslationContext) {
        self.translation = Some(context);
    }
}

type FileData = Arc<Mutex<Vec<u8>>>;

/// In-memory filesystem. Cloning the handle shares the same files.
#[derive(Clone, Default)]
pub struct MemFileSystem {
    files: Arc<Mutex<BTreeMap<String, FileData>>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file with the given contents.
    pub fn insert(&self, name: &str, contents: &[u8]) {
        self.files
            .lock()
            .insert(name.to_string(), Arc::new(Mutex::new(contents.to_vec())));
    }

    /// Returns a copy of a file's contents.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|data| data.lock().clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

impl FileSystem for MemFileSystem {
    type File = MemFile;

    fn open(&self, name: &str) -> Option<MemFile> {
        self.files.lock().get(name).map(|data| MemFile {
            data: Arc::clone(data),
        })
    }

    fn create(&self, name: &str, size: usize) -> bool {
        self.files
            .lock()
            .insert(name.to_string(), Arc::new(Mutex::new(vec![0u8; size])));
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }
}

/// Handle to a file in a [`MemFileSystem`].
pub struct MemFile {
    data: FileData,
}

impl OpenFile for MemFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        count
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let count = buf.len().min(data.len() - offset);
        data[offset..offset + count].copy_from_slice(&buf[..count]);
        count
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameNumber;

    #[test]
    fn machine_frames_are_disjoint() {
        let mut machine = EmulatedMachine::new(4);
        machine.frame_mut(FrameNumber::new(1)).fill(0xAB);

        assert!(machine.frame(FrameNumber::new(0)).iter().all(|&b| b == 0));
        assert!(machine.frame(FrameNumber::new(1)).iter().all(|&b| b == 0xAB));
        assert!(machine.frame(FrameNumber::new(2)).iter().all(|&b| b == 0));
        assert_eq!(machine.num_frames(), 4);
    }

    #[test]
    fn registers_round_trip() {
        let mut machine = EmulatedMachine::new(1);
        machine.write_register(Register::PC, 12);
        assert_eq!(machine.read_register(Register::PC), 12);
        assert_eq!(machine.read_register(Register::NEXT_PC), 0);
    }

    #[test]
    fn file_io_is_truncated_at_end() {
        let fs = MemFileSystem::new();
        fs.insert("prog", &[1, 2, 3, 4]);
        let mut file = fs.open("prog").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 2), 2);
        assert_eq!(&buf[..2], &[3, 4]);

        assert_eq!(file.write_at(&[9, 9, 9], 3), 1);
        assert_eq!(fs.contents("prog").unwrap(), vec![1, 2, 3, 9]);
        assert_eq!(file.read_at(&mut buf, 10), 0);
    }

    #[test]
    fn create_and_remove() {
        let fs = MemFileSystem::new();
        assert!(fs.create("swap", 256));
        assert_eq!(fs.open("swap").unwrap().len(), 256);
        assert!(fs.remove("swap"));
        assert!(!fs.remove("swap"));
        assert!(fs.open("swap").is_none());
    }
}
