use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use strata_types::CancelToken;
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::traits::Db;

/// File-backed key/value store: one file per key under a root directory.
///
/// Keys are arbitrary bytes, so file names are the lowercase hex encoding
/// of the key. Writes go through a temporary file followed by a rename,
/// which keeps each key's value atomic on POSIX filesystems. `list` scans
/// the directory and returns matching keys sorted.
///
/// This is the small-deployment persistence adapter; anything heavier
/// (an embedded LSM/B-tree engine, a networked KV) plugs in behind the
/// same [`Db`] trait.
pub struct FileDb {
    root: PathBuf,
}

impl FileDb {
    /// Open (or create) a file-backed store rooted at `root`.
    pub fn open(root: &Path) -> DbResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn key_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(hex::encode(key))
    }
}

impl Db for FileDb {
    fn get(&self, cancel: &CancelToken, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        cancel.check()?;
        match fs::read(self.key_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, cancel: &CancelToken, key: &[u8], value: &[u8]) -> DbResult<()> {
        cancel.check()?;
        let path = self.key_path(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn list(&self, cancel: &CancelToken, prefix: &[u8]) -> DbResult<Vec<Vec<u8>>> {
        cancel.check()?;
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(key) = hex::decode(name) else {
                // Temp files and strays are not keys.
                warn!(file = name, "skipping non-key file in store directory");
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, cancel: &CancelToken, keys: &[&[u8]]) -> DbResult<()> {
        cancel.check()?;
        for key in keys {
            match fs::remove_file(self.key_path(key)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(DbError::Io(e)),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDb").field("root", &self.root).finish()
    }
}
