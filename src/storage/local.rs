use super::{ObjectStore, StoreError, StoreErrorCode};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Blobs stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::new(
                        StoreErrorCode::Validation,
                        format!("blob key `{key}` must be a relative path without `..`"),
                    ));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(StoreError::new(StoreErrorCode::Validation, "blob key is empty"));
        }
        Ok(self.root.join(clean))
    }
}

impl ObjectStore for LocalDirStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| {
            let code = if e.kind() == ErrorKind::NotFound {
                StoreErrorCode::NotFound
            } else {
                StoreErrorCode::Io
            };
            StoreError::new(code, format!("read {}: {e}", path.display()))
        })
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::new(
                    StoreErrorCode::Io,
                    format!("create {}: {e}", parent.display()),
                )
            })?;
        }
        // Readers never see a partially written blob.
        let tmp = path.with_extension("partial");
        fs::write(&tmp, bytes).map_err(|e| {
            StoreError::new(StoreErrorCode::Io, format!("write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            StoreError::new(
                StoreErrorCode::Io,
                format!("rename {} -> {}: {e}", tmp.display(), path.display()),
            )
        })
    }

    fn describe(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}
