//! Descriptor file loading.
//!
//! Each external device type is declared by one JSON file in the
//! descriptor subdirectory, associating the type name with the handler's
//! bus object and the config/info/stats schemas:
//!
//! ```json
//! {
//!   "name": "ovs",
//!   "ubus_name": "network.ovs",
//!   "bridge": true,
//!   "br_prefix": "ovs-",
//!   "config": [
//!     {"name": "empty", "type": "u8"},
//!     {"name": "ifname", "type": "array", "items": {"name": "", "type": "string"}}
//!   ],
//!   "info": [{"name": "mtu", "type": "u32"}]
//! }
//! ```
//!
//! Malformed descriptors are logged and skipped; they never abort startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use extdev_controller::TypeDescriptor;
use extdev_core::Schema;
use extdev_core::schema::FieldSpec;

/// Name of the descriptor subdirectory searched for in each path.
pub const DESCRIPTOR_SUBDIR: &str = "extdev-config";

/// Errors surfaced by descriptor loading.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Reading the descriptor directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A descriptor file is not valid JSON for the expected shape.
    #[error("malformed descriptor: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for descriptor operations.
pub type DescriptorResult<T> = Result<T, DescriptorError>;

/// One descriptor file as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    /// Device type name.
    pub name: String,
    /// Bus object name of the external handler.
    pub ubus_name: String,
    /// Whether this type supports bridging.
    #[serde(default)]
    pub bridge: bool,
    /// Bridge device name prefix.
    #[serde(default)]
    pub br_prefix: Option<String>,
    #[serde(default)]
    pub config: Vec<FieldSpec>,
    #[serde(default)]
    pub info: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub stats: Option<Vec<FieldSpec>>,
}

impl Descriptor {
    /// Parses the schemas and produces the controller-facing descriptor.
    pub fn into_type_descriptor(self) -> TypeDescriptor {
        TypeDescriptor {
            name: self.name,
            peer_name: self.ubus_name,
            bridge_capability: self.bridge,
            bridge_prefix: self.br_prefix,
            config_schema: Schema::from_specs(&self.config),
            info_schema: self.info.map(|specs| Schema::from_specs(&specs)),
            stats_schema: self.stats.map(|specs| Schema::from_specs(&specs)),
        }
    }
}

/// Descriptor loader with support for multiple search paths.
pub struct DescriptorLoader {
    search_paths: Vec<PathBuf>,
}

impl DescriptorLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Adds a directory expected to contain the descriptor subdirectory.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.add_search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.add_search_path(config_dir.join("extdev"))
        } else {
            self
        }
    }

    /// Loads descriptors from the first search path that carries the
    /// descriptor subdirectory. No directory at all is not an error: an
    /// empty set is returned and the controller simply manages no types.
    pub fn load(&self) -> DescriptorResult<Vec<Descriptor>> {
        match self.find_dir() {
            Some(dir) => self.load_from_dir(&dir),
            None => {
                info!("no descriptor directory found, managing no external device types");
                Ok(Vec::new())
            }
        }
    }

    /// Loads every `*.json` descriptor in a directory. Files that fail to
    /// parse are logged and skipped.
    pub fn load_from_dir<P: AsRef<Path>>(&self, dir: P) -> DescriptorResult<Vec<Descriptor>> {
        let dir = dir.as_ref();
        info!("loading device type descriptors from: {}", dir.display());

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut descriptors = Vec::new();
        for path in paths {
            match self.load_file(&path) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(err) => {
                    warn!(file = %path.display(), %err, "skipping unusable descriptor");
                }
            }
        }
        debug!("loaded {} device type descriptor(s)", descriptors.len());
        Ok(descriptors)
    }

    /// Parses a descriptor from a JSON string.
    pub fn load_from_str(&self, json: &str) -> DescriptorResult<Descriptor> {
        Ok(serde_json::from_str(json)?)
    }

    fn load_file(&self, path: &Path) -> DescriptorResult<Descriptor> {
        let content = std::fs::read_to_string(path)?;
        self.load_from_str(&content)
    }

    fn find_dir(&self) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            let candidate = search_path.join(DESCRIPTOR_SUBDIR);
            debug!("checking for descriptor directory: {}", candidate.display());
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for DescriptorLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_descriptor() {
        let loader = DescriptorLoader::new();
        let descriptor = loader
            .load_from_str(r#"{"name": "ovs", "ubus_name": "network.ovs"}"#)
            .unwrap();
        assert_eq!(descriptor.name, "ovs");
        assert!(!descriptor.bridge);

        let td = descriptor.into_type_descriptor();
        assert!(td.config_schema.is_empty());
        assert!(td.info_schema.is_none());
    }

    #[test]
    fn absent_info_schema_leaves_the_dump_unset() {
        let loader = DescriptorLoader::new();
        let descriptor = loader
            .load_from_str(
                r#"{
                    "name": "ovs",
                    "ubus_name": "network.ovs",
                    "bridge": true,
                    "br_prefix": "ovs-",
                    "config": [{"name": "mtu", "type": "u32"}],
                    "stats": [{"name": "rx_packets", "type": "u64"}]
                }"#,
            )
            .unwrap();
        let td = descriptor.into_type_descriptor();
        assert!(td.bridge_capability);
        assert_eq!(td.bridge_prefix.as_deref(), Some("ovs-"));
        assert!(td.info_schema.is_none());
        assert!(td.stats_schema.is_some());
        assert_eq!(td.config_schema.fields().len(), 1);
    }

    #[test]
    fn rejects_a_descriptor_without_a_peer_object() {
        let loader = DescriptorLoader::new();
        assert!(loader.load_from_str(r#"{"name": "ovs"}"#).is_err());
    }

    #[test]
    fn loads_descriptors_from_a_directory() {
        let dir = std::env::temp_dir().join(format!(
            "extdev-descriptors-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("ovs.json"),
            r#"{"name": "ovs", "ubus_name": "network.ovs"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.join("ignored.conf"), "x").unwrap();

        let loader = DescriptorLoader::new();
        let descriptors = loader.load_from_dir(&dir).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "ovs");

        std::fs::remove_dir_all(&dir).ok();
    }
}
