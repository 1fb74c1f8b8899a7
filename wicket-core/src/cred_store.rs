//! Credential persistence over an abstract key-value store.
//!
//! The backing store (NVS flash on the appliance, a file in the simulator)
//! is an external collaborator behind [`NvsStore`]. `CredStore` owns the
//! namespace layout: three blobs under `espwifimgr`: a fixed 32-byte SSID
//! image, a fixed 64-byte password image, and the settings serialized as
//! JSON. Every load/save runs as one atomic sequence under a process-wide
//! mutex, and writes are skipped when nothing changed to save flash cycles.

use std::sync::{Arc, Mutex};

use derive_more::{Display, Error};
use log::{debug, info, warn};

use crate::config::{StaConfig, StaCreds, WifiSettings, MAX_PASSWORD_LEN, MAX_SSID_LEN};

pub const NVS_NAMESPACE: &str = "espwifimgr";

const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";
const KEY_SETTINGS: &str = "settings";

/// Failure talking to the backing store. Credential operations fail but the
/// core keeps running.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum NvsError {
    #[display("key-value store is not accessible")]
    NotAvailable,
    #[display("key-value store read failed")]
    ReadFailed,
    #[display("key-value store write failed")]
    WriteFailed,
    #[display("key-value store commit failed")]
    CommitFailed,
    #[display("stored settings blob is corrupt")]
    Corrupt,
}

/// Abstract non-volatile key-value store.
///
/// Implementations are free to batch; `commit` must make prior `set_blob`
/// calls durable.
pub trait NvsStore: Send + Sync {
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, NvsError>;
    fn set_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), NvsError>;
    fn commit(&self, namespace: &str) -> Result<(), NvsError>;
}

/// Heap-backed store for tests and the simulator.
#[derive(Default)]
pub struct InMemoryNvs {
    inner: Mutex<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    blobs: std::collections::HashMap<(String, String), Vec<u8>>,
    writes: usize,
    commits: usize,
}

impl InMemoryNvs {
    /// Number of `set_blob` calls so far; used to assert write-skipping.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    pub fn commit_count(&self) -> usize {
        self.inner.lock().unwrap().commits
    }
}

impl NvsStore for InMemoryNvs {
    fn get_blob(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, NvsError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blobs.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set_blob(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), NvsError> {
        let mut inner = self.inner.lock().unwrap();
        inner.writes += 1;
        inner
            .blobs
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn commit(&self, namespace: &str) -> Result<(), NvsError> {
        let _ = namespace;
        self.inner.lock().unwrap().commits += 1;
        Ok(())
    }
}

/// Load/save of the `(settings, ssid, password)` triple.
pub struct CredStore {
    store: Arc<dyn NvsStore>,
    // One writer/reader at a time across the whole process, like the NVS
    // sync mutex in front of flash.
    sync: Mutex<()>,
}

impl CredStore {
    pub fn new(store: Arc<dyn NvsStore>) -> Self {
        Self {
            store,
            sync: Mutex::new(()),
        }
    }

    /// Fetch the persisted config. `Ok(None)` when nothing was ever saved.
    pub fn load(&self) -> Result<Option<StaConfig>, NvsError> {
        let _guard = self.sync.lock().unwrap();

        let ssid_blob = match self.store.get_blob(NVS_NAMESPACE, KEY_SSID)? {
            Some(blob) => blob,
            None => return Ok(None),
        };
        let password_blob = match self.store.get_blob(NVS_NAMESPACE, KEY_PASSWORD)? {
            Some(blob) => blob,
            None => return Ok(None),
        };
        let settings_blob = match self.store.get_blob(NVS_NAMESPACE, KEY_SETTINGS)? {
            Some(blob) => blob,
            None => return Ok(None),
        };

        let settings: WifiSettings =
            serde_json::from_slice(&settings_blob).map_err(|e| {
                warn!("Persisted settings blob does not parse: {e}");
                NvsError::Corrupt
            })?;
        let creds = StaCreds::from_blobs(&ssid_blob, &password_blob);

        debug!("Loaded wifi config: ssid:{}", creds.ssid());
        Ok(Some(StaConfig { settings, creds }))
    }

    /// Persist the config, skipping any blob whose stored bytes already
    /// match.
    pub fn save(&self, config: &StaConfig) -> Result<(), NvsError> {
        let _guard = self.sync.lock().unwrap();
        info!("About to save config to flash");

        let mut change = false;
        change |= self.write_if_changed(KEY_SSID, &config.creds.ssid_blob())?;
        change |= self.write_if_changed(KEY_PASSWORD, &config.creds.password_blob())?;

        let settings_blob =
            serde_json::to_vec(&config.settings).map_err(|_| NvsError::WriteFailed)?;
        change |= self.write_if_changed(KEY_SETTINGS, &settings_blob)?;

        if change {
            self.store.commit(NVS_NAMESPACE)?;
        } else {
            info!("Wifi config was not saved to flash because no change has been detected");
        }
        Ok(())
    }

    /// Reset the stored credentials to "unconfigured" and the settings to
    /// the given defaults, then persist.
    pub fn clear(&self, default_settings: &WifiSettings) -> Result<(), NvsError> {
        info!("About to clear config in flash");
        let cleared = StaConfig {
            settings: default_settings.clone(),
            creds: StaCreds::default(),
        };
        debug_assert_eq!(cleared.creds.ssid_blob(), [0u8; MAX_SSID_LEN]);
        debug_assert_eq!(cleared.creds.password_blob(), [0u8; MAX_PASSWORD_LEN]);
        self.save(&cleared)
    }

    fn write_if_changed(&self, key: &str, value: &[u8]) -> Result<bool, NvsError> {
        let existing = self.store.get_blob(NVS_NAMESPACE, key)?;
        if existing.as_deref() == Some(value) {
            return Ok(false);
        }
        self.store.set_blob(NVS_NAMESPACE, key, value)?;
        debug!("wrote wifi config blob '{key}' ({} bytes)", value.len());
        Ok(true)
    }
}
