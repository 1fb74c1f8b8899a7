//! JSON-file implementation of the key-value store trait.
//!
//! Blobs are kept hex-encoded under `namespace/key` entries in one JSON
//! file; `commit` writes the whole thing back, which is close enough to the
//! flash page semantics the real store has.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use wicket_core::cred_store::{NvsError, NvsStore};

pub struct FileNvs {
    path: PathBuf,
    blobs: Mutex<BTreeMap<String, String>>,
}

impl FileNvs {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let blobs = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            blobs: Mutex::new(blobs),
        })
    }

    fn entry_key(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }
}

impl NvsStore for FileNvs {
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, NvsError> {
        let blobs = self.blobs.lock().unwrap();
        match blobs.get(&Self::entry_key(namespace, key)) {
            Some(encoded) => match hex::decode(encoded) {
                Ok(blob) => Ok(Some(blob)),
                Err(e) => {
                    warn!("corrupt blob {namespace}/{key}: {e}");
                    Err(NvsError::ReadFailed)
                }
            },
            None => Ok(None),
        }
    }

    fn set_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), NvsError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(Self::entry_key(namespace, key), hex::encode(value));
        Ok(())
    }

    fn commit(&self, namespace: &str) -> Result<(), NvsError> {
        let blobs = self.blobs.lock().unwrap();
        let serialized =
            serde_json::to_string_pretty(&*blobs).map_err(|_| NvsError::CommitFailed)?;
        std::fs::write(&self.path, serialized).map_err(|e| {
            warn!("writing {} failed: {e}", self.path.display());
            NvsError::CommitFailed
        })?;
        debug!("committed namespace {namespace} to {}", self.path.display());
        Ok(())
    }
}
