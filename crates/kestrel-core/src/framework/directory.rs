//! The bundle directory file: a JSON document naming the bundles a host
//! should install at boot, with optional per-bundle start levels and a
//! `properties` object merged into the framework properties.

use std::path::Path;

use serde::Deserialize;

use crate::framework::error::FrameworkError;
use crate::registry::properties::Properties;

#[derive(Deserialize, Debug)]
struct RawDirectory {
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    bundles: Vec<RawDirectoryEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawDirectoryEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        startlevel: Option<u32>,
    },
}

/// One entry of the directory: a bundle name, an optional location hint for
/// the loader, and an optional start level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub location: Option<String>,
    pub start_level: Option<u32>,
}

/// Parsed bundle directory. Duplicate names keep the first occurrence.
#[derive(Debug, Clone, Default)]
pub struct BundleDirectory {
    pub properties: Properties,
    pub entries: Vec<DirectoryEntry>,
}

impl BundleDirectory {
    pub fn from_json(text: &str) -> Result<Self, FrameworkError> {
        let raw: RawDirectory =
            serde_json::from_str(text).map_err(|err| FrameworkError::InvalidDirectory {
                message: err.to_string(),
            })?;

        let mut entries: Vec<DirectoryEntry> = Vec::with_capacity(raw.bundles.len());
        for entry in raw.bundles {
            let (name, location, start_level) = match entry {
                RawDirectoryEntry::Name(name) => (name, None, None),
                RawDirectoryEntry::Detailed {
                    name,
                    location,
                    startlevel,
                } => (name, location, startlevel),
            };
            if entries.iter().any(|e| e.name == name) {
                log::warn!("Duplicate bundle '{}' in directory file, ignoring", name);
                continue;
            }
            entries.push(DirectoryEntry {
                name,
                location,
                start_level,
            });
        }

        Ok(BundleDirectory {
            properties: raw.properties,
            entries,
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FrameworkError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|err| {
            FrameworkError::InvalidDirectory {
                message: format!("{}: {}", path.display(), err),
            }
        })?;
        Self::from_json(&text)
    }
}
