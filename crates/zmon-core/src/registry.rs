// ── Device registry ──
//
// In-memory index of device records keyed by name, optionally bound to a
// JSON file. Iteration follows insertion order; overwriting a device keeps
// its position.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, warn};
use zmon_api::Device;

use crate::error::CoreError;

/// Devices maintained by one actor.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    file: Option<PathBuf>,
    devices: IndexMap<String, Device>,
}

impl DeviceRegistry {
    /// An empty registry with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry bound to `path`, populated from it when the file exists.
    ///
    /// A file that cannot be read leaves the registry empty (and still
    /// bound, so the next store overwrites it).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut registry = Self {
            file: Some(path.into()),
            devices: IndexMap::new(),
        };
        if let Err(e) = registry.load() {
            warn!(error = %e, "starting with an empty device registry");
        }
        registry
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Bind (or rebind) the backing file without touching the contents.
    pub fn set_file(&mut self, path: impl Into<PathBuf>) {
        self.file = Some(path.into());
    }

    // ── Records ──────────────────────────────────────────────────────

    /// Insert or overwrite a device. Returns the previous record, if any.
    pub fn insert(&mut self, device: Device) -> Option<Device> {
        self.devices.insert(device.name.clone(), device)
    }

    /// Remove a device by name. Missing names are a no-op.
    pub fn remove(&mut self, name: &str) -> Option<Device> {
        self.devices.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    /// Devices in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Replace the contents with those of the backing file.
    ///
    /// A missing file loads as empty. Returns the number of devices loaded.
    pub fn load(&mut self) -> Result<usize, CoreError> {
        let Some(path) = self.file.as_deref() else {
            return Ok(self.devices.len());
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %path.display(), "no device file yet");
                self.devices.clear();
                return Ok(0);
            }
            Err(source) => {
                return Err(CoreError::Persistence {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let devices: Vec<Device> =
            serde_json::from_slice(&bytes).map_err(|source| CoreError::CorruptStore {
                path: path.to_path_buf(),
                source,
            })?;

        self.devices = devices
            .into_iter()
            .map(|device| (device.name.clone(), device))
            .collect();
        debug!(file = %path.display(), devices = self.devices.len(), "device registry loaded");
        Ok(self.devices.len())
    }

    /// Write the contents to the backing file. No-op when unbound.
    ///
    /// Writes a sibling temporary file and renames it into place.
    pub fn store(&self) -> Result<(), CoreError> {
        let Some(path) = self.file.as_deref() else {
            return Ok(());
        };
        let io_err = |source| CoreError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let devices: Vec<&Device> = self.devices.values().collect();
        let json = serde_json::to_vec_pretty(&devices).map_err(|source| {
            CoreError::CorruptStore {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;

        debug!(file = %path.display(), devices = self.devices.len(), "device registry stored");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
