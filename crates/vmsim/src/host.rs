//! Host filesystem backing for executables and swap files.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use vmm::{FileSystem, OpenFile};

/// Files in one host directory. Names are resolved relative to `root`.
pub struct HostFileSystem {
    root: PathBuf,
}

impl HostFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FileSystem for HostFileSystem {
    type File = HostFile;

    fn open(&self, name: &str) -> Option<HostFile> {
        let path = self.path(name);
        match HostFile::open(&path) {
            Ok(file) => Some(file),
            Err(err) => {
                log::debug!("open {}: {}", path.display(), err);
                None
            }
        }
    }

    fn create(&self, name: &str, size: usize) -> bool {
        let path = self.path(name);
        let result = File::create(&path).and_then(|file| file.set_len(size as u64));
        if let Err(err) = &result {
            log::error!("create {}: {}", path.display(), err);
        }
        result.is_ok()
    }

    fn remove(&self, name: &str) -> bool {
        fs::remove_file(self.path(name)).is_ok()
    }
}

/// An open host file. Its length is fixed when it is opened.
pub struct HostFile {
    file: File,
    len: usize,
}

impl HostFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        Ok(Self { file, len })
    }

    /// Number of bytes of an `wanted`-byte transfer at `offset` that fit in the file.
    fn span(&self, offset: usize, wanted: usize) -> usize {
        wanted.min(self.len.saturating_sub(offset))
    }

    fn transfer(
        &mut self,
        offset: usize,
        op: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        op(&mut self.file)
    }
}

impl OpenFile for HostFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> usize {
        let count = self.span(offset, buf.len());
        if count == 0 {
            return 0;
        }
        match self.transfer(offset, |file| file.read_exact(&mut buf[..count])) {
            Ok(()) => count,
            Err(err) => {
                log::error!("read of {} bytes at {:#x} failed: {}", count, offset, err);
                0
            }
        }
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        let count = self.span(offset, buf.len());
        if count == 0 {
            return 0;
        }
        match self.transfer(offset, |file| file.write_all(&buf[..count])) {
            Ok(()) => count,
            Err(err) => {
                log::error!("write of {} bytes at {:#x} failed: {}", count, offset, err);
                0
            }
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vmsim-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn create_open_and_remove() {
        let dir = scratch_dir("create");
        let host = HostFileSystem::new(&dir);

        assert!(host.create("p.va", 256));
        let file = host.open("p.va").unwrap();
        assert_eq!(file.len(), 256);

        assert!(host.remove("p.va"));
        assert!(!host.remove("p.va"));
        assert!(host.open("p.va").is_none());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn transfers_are_truncated_at_end() {
        let dir = scratch_dir("truncate");
        let host = HostFileSystem::new(&dir);
        fs::write(host.path("prog"), [1u8, 2, 3, 4]).unwrap();
        let mut file = host.open("prog").unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 1), 3);
        assert_eq!(&buf[..3], &[2, 3, 4]);
        assert_eq!(file.read_at(&mut buf, 9), 0);

        assert_eq!(file.write_at(&[9, 9], 3), 1);
        assert_eq!(fs::read(host.path("prog")).unwrap(), [1, 2, 3, 9]);
        fs::remove_dir_all(dir).unwrap();
    }
}
