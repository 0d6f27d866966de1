use std::io;
use std::path::Path;

/// The filesystem operations connection handling relies on.
pub trait FileSystem: Send + Sync {
    /// True if `path` is a regular file or a directory.
    fn exists(&self, path: &Path) -> bool;
    fn is_directory(&self, path: &Path) -> bool;
    fn size(&self, path: &Path) -> io::Result<u64>;
    fn read_all(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// `FileSystem` backed by `std::fs`. Follows symlinks. Special files such as FIFOs are reported
/// as absent so a worker never blocks opening one.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|metadata| metadata.is_file() || metadata.is_dir())
            .unwrap_or(false)
    }

    fn is_directory(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        std::fs::metadata(path).map(|metadata| metadata.len())
    }

    fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}
