// src/file.rs
//! Virtual file system: asset directories plus packed archives layered on top.
//!
//! Packages added later shadow earlier ones, and every package shadows the plain directories.
//! Archive layout (little endian): `b"SPAK"`, entry count `u32`, then per entry
//! `u32` name length, UTF-8 name, `u32` data length, data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::FileError;

const PACKAGE_MAGIC: &[u8; 4] = b"SPAK";

/// Normalizes separators so `a\b.png`, `./a/b.png` and `/a/b.png` name the same entry.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// In-memory archive.
#[derive(Debug, Default, Clone)]
pub struct Package {
    name: String,
    entries: HashMap<String, Arc<[u8]>>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Arc<[u8]>>) {
        self.entries.insert(normalize_path(path), bytes.into());
    }

    pub fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        self.entries.get(&normalize_path(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        let mut out = Vec::new();
        out.extend_from_slice(PACKAGE_MAGIC);
        out.extend_from_slice(&(names.len() as u32).to_le_bytes());
        for name in names {
            let data = &self.entries[name];
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, FileError> {
        let name = name.into();
        let decode = |reason: &str| FileError::Decode {
            path: name.clone(),
            reason: reason.to_string(),
        };
        let mut reader = ByteReader::new(bytes);
        if reader.take(4).ok_or_else(|| decode("truncated header"))? != PACKAGE_MAGIC {
            return Err(decode("bad magic"));
        }
        let count = reader.u32().ok_or_else(|| decode("truncated header"))?;
        let mut package = Package::new(name.clone());
        for _ in 0..count {
            let len = reader.u32().ok_or_else(|| decode("truncated entry"))? as usize;
            let raw = reader.take(len).ok_or_else(|| decode("truncated entry name"))?;
            let entry = std::str::from_utf8(raw).map_err(|_| decode("entry name is not UTF-8"))?;
            let len = reader.u32().ok_or_else(|| decode("truncated entry"))? as usize;
            let data = reader.take(len).ok_or_else(|| decode("truncated entry data"))?;
            package.insert(entry, data.to_vec());
        }
        Ok(package)
    }
}

/// Cursor over a little-endian byte buffer. Shared with the static font reader.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        let raw = self.take(4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }
}

/// Resolves virtual paths to bytes.
#[derive(Debug, Default)]
pub struct FileSystem {
    roots: RwLock<Vec<PathBuf>>,
    packages: RwLock<Vec<Package>>,
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roots(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let fs = Self::new();
        for root in roots {
            fs.add_root(root);
        }
        fs
    }

    pub fn add_root(&self, root: impl Into<PathBuf>) {
        self.roots.write().push(root.into());
    }

    pub fn add_package(&self, package: Package) {
        log::debug!(target: "slop2d::resource", "mounted package '{}' ({} entries)", package.name(), package.len());
        self.packages.write().push(package);
    }

    /// Mounts a packed archive from disk.
    pub fn add_package_file(&self, path: impl AsRef<Path>) -> Result<(), FileError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound {
                path: path.display().to_string(),
            },
            _ => FileError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let package = Package::from_bytes(path.display().to_string(), &bytes)?;
        self.add_package(package);
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.read(path).is_ok()
    }

    pub fn read(&self, path: &str) -> Result<Arc<[u8]>, FileError> {
        let key = normalize_path(path);
        for package in self.packages.read().iter().rev() {
            if let Some(bytes) = package.get(&key) {
                return Ok(bytes);
            }
        }

        let direct = Path::new(path);
        if direct.is_absolute() && direct.is_file() {
            return read_disk(direct);
        }
        for root in self.roots.read().iter() {
            let candidate = root.join(&key);
            if candidate.is_file() {
                return read_disk(&candidate);
            }
        }
        Err(FileError::NotFound { path: path.to_string() })
    }

    pub fn read_to_string(&self, path: &str) -> Result<String, FileError> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| FileError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

fn read_disk(path: &Path) -> Result<Arc<[u8]>, FileError> {
    std::fs::read(path).map(Arc::from).map_err(|source| FileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize_path("./a\\b/../c.png"), "a/c.png");
        assert_eq!(normalize_path("/x//y.txt"), "x/y.txt");
    }

    #[test]
    fn package_shadows_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shaders")).unwrap();
        std::fs::write(dir.path().join("shaders/a.wgsl"), "disk").unwrap();

        let fs = FileSystem::with_roots([dir.path().to_path_buf()]);
        assert_eq!(fs.read_to_string("shaders/a.wgsl").unwrap(), "disk");

        let mut package = Package::new("patch");
        package.insert("shaders\\a.wgsl", b"packed".to_vec());
        fs.add_package(package);
        assert_eq!(fs.read_to_string("shaders/a.wgsl").unwrap(), "packed");
    }

    #[test]
    fn not_found_and_decode_are_distinct() {
        let fs = FileSystem::new();
        assert!(matches!(fs.read("nope.png"), Err(FileError::NotFound { .. })));

        let mut package = Package::new("bin");
        package.insert("bad.txt", vec![0xff, 0xfe]);
        fs.add_package(package);
        assert!(matches!(fs.read_to_string("bad.txt"), Err(FileError::Decode { .. })));
    }

    #[test]
    fn archive_bytes_reload() {
        let mut package = Package::new("a");
        package.insert("one.bin", vec![1, 2, 3]);
        package.insert("dir/two.bin", vec![4]);
        let restored = Package::from_bytes("a", &package.to_bytes()).unwrap();
        assert_eq!(&*restored.get("dir/two.bin").unwrap(), &[4]);
        assert_eq!(restored.len(), 2);

        let mut truncated = package.to_bytes();
        truncated.truncate(truncated.len() - 1);
        assert!(matches!(Package::from_bytes("a", &truncated), Err(FileError::Decode { .. })));
    }

    #[test]
    fn package_file_mounts_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = Package::new("disk");
        package.insert("readme.txt", b"hi".to_vec());
        let path = dir.path().join("data.spak");
        std::fs::write(&path, package.to_bytes()).unwrap();

        let fs = FileSystem::new();
        fs.add_package_file(&path).unwrap();
        assert_eq!(fs.read_to_string("readme.txt").unwrap(), "hi");
        assert!(matches!(
            fs.add_package_file(dir.path().join("missing.spak")),
            Err(FileError::NotFound { .. })
        ));
    }
}
