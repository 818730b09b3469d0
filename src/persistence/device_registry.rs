use super::{DeviceRecord, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const REGISTRY_FILE: &str = "devices.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    device: Vec<DeviceRecord>,
}

/// Named device records backed by a TOML file.
#[derive(Debug)]
pub struct DeviceRegistry {
    path: PathBuf,
    devices: BTreeMap<String, DeviceRecord>,
    /// Entries from the file that fail validation, written back unchanged on save
    rejected: Vec<DeviceRecord>,
}

impl DeviceRegistry {
    pub fn default_path() -> PathBuf {
        let mut path = crate::config::AgentConfig::default_path();
        path.set_file_name(REGISTRY_FILE);
        path
    }

    /// Loads the registry at `path`. A missing file yields an empty registry.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| RegistryError::Io {
                path: path.clone(),
                source,
            })?;

        if !exists {
            debug!("No device registry at {}, starting empty", path.display());
            return Ok(Self {
                path,
                devices: BTreeMap::new(),
                rejected: Vec::new(),
            });
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RegistryError::Io {
                path: path.clone(),
                source,
            })?;
        let file: RegistryFile = toml::from_str(&content)?;

        let mut devices = BTreeMap::new();
        let mut rejected = Vec::new();
        for record in file.device {
            if let Err(e) = record.validate() {
                warn!("Keeping unusable device from {} as is: {}", path.display(), e);
                rejected.push(record);
                continue;
            }
            if devices.insert(record.name.clone(), record).is_some() {
                warn!("Duplicate device entry in {}, keeping the last", path.display());
            }
        }
        debug!("Loaded {} device(s) from {}", devices.len(), path.display());

        Ok(Self {
            path,
            devices,
            rejected,
        })
    }

    pub async fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RegistryError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let file = RegistryFile {
            device: self
                .devices
                .values()
                .chain(self.rejected.iter())
                .cloned()
                .collect(),
        };
        let content = toml::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;
        info!(
            "Saved {} device(s) to {}",
            self.devices.len() + self.rejected.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds or replaces a device. Returns true when an existing record was replaced.
    ///
    /// A valid record replaces an unusable entry of the same name.
    pub fn upsert(&mut self, record: DeviceRecord) -> Result<bool, RegistryError> {
        record.validate()?;
        let before = self.rejected.len();
        self.rejected.retain(|r| r.name != record.name);
        let fixed = self.rejected.len() != before;
        Ok(self.devices.insert(record.name.clone(), record).is_some() || fixed)
    }

    /// Removes a device, including an unusable entry kept from the file.
    pub fn remove(&mut self, name: &str) -> Result<DeviceRecord, RegistryError> {
        if let Some(record) = self.devices.remove(name) {
            return Ok(record);
        }
        match self.rejected.iter().position(|r| r.name == name) {
            Some(index) => Ok(self.rejected.remove(index)),
            None => Err(RegistryError::UnknownDevice(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Result<&DeviceRecord, RegistryError> {
        self.devices
            .get(name)
            .ok_or_else(|| RegistryError::UnknownDevice(name.to_string()))
    }

    /// All devices, sorted by name.
    pub fn list(&self) -> Vec<&DeviceRecord> {
        self.devices.values().collect()
    }

    /// Entries that failed validation on load.
    pub fn rejected(&self) -> &[DeviceRecord] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.rejected.is_empty()
    }
}
