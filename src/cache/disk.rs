//! On-disk cache tier: one file per key under a namespace directory

use crate::error::Result;
use md5::{Digest, Md5};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Files live at `<root>/<namespace>/<md5(key)>.cache`. Entries never
/// expire; they go away through `delete` or `clear_namespace`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Create the store, making `root` if it does not exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, namespace: &str, key: &str) -> PathBuf {
        let digest = Md5::digest(key.as_bytes());
        self.root.join(namespace).join(format!("{:x}.cache", digest))
    }

    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(namespace, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file and rename, so readers never see a
    /// partial entry
    pub fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(namespace, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(namespace, key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Remove the namespace directory; returns how many entries it held
    pub fn clear_namespace(&self, namespace: &str) -> Result<usize> {
        let dir = self.root.join(namespace);
        let count = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|x| x == "cache"))
                .count(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        fs::remove_dir_all(&dir)?;
        Ok(count)
    }
}
