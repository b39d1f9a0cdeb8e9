//! Canonical textual rendering of observed inventories
//!
//! The one contract that matters here is determinism: equal inventories
//! render to byte-identical text on any host, in any process, regardless
//! of how the inventory was assembled. The inventory maps are ordered, so
//! rendering is a plain walk with no sorting surprises hidden in hashers.

use crate::{
    errors::SnapshotError,
    image::{ContentDigest, ImageName, Tag},
    inventory::RegistryInventory,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Write, str::FromStr};

/// Output form for a rendered snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    Yaml,
    Csv,
}

impl FromStr for SnapshotFormat {
    type Err = SnapshotError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" => Ok(SnapshotFormat::Yaml),
            "csv" => Ok(SnapshotFormat::Csv),
            other => Err(SnapshotError::UnknownFormat(other.to_owned())),
        }
    }
}

/// One image in a YAML snapshot, in the same shape manifests use
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: ImageName,
    pub dmap: BTreeMap<ContentDigest, Vec<Tag>>,
}

/// Render one registry's observed inventory
pub fn render(inventory: &RegistryInventory, format: SnapshotFormat) -> Result<String, SnapshotError> {
    match format {
        SnapshotFormat::Yaml => render_yaml(inventory),
        SnapshotFormat::Csv => Ok(render_csv(inventory)),
    }
}

fn render_yaml(inventory: &RegistryInventory) -> Result<String, SnapshotError> {
    let mut entries = Vec::new();
    for (name, repo) in inventory.iter() {
        let mut dmap = BTreeMap::new();
        for (digest, tags) in repo.iter() {
            dmap.insert(digest.clone(), tags.iter().cloned().collect::<Vec<Tag>>());
        }
        entries.push(SnapshotEntry {
            name: name.clone(),
            dmap,
        });
    }
    Ok(serde_yaml::to_string(&entries)?)
}

fn render_csv(inventory: &RegistryInventory) -> String {
    let mut out = String::new();
    for (name, repo) in inventory.iter() {
        for (digest, tags) in repo.iter() {
            if tags.is_empty() {
                // untagged content still gets a row, with an empty tag field
                writeln!(&mut out, "{},{},", name, digest).unwrap();
            } else {
                for tag in tags {
                    writeln!(&mut out, "{},{},{}", name, digest, tag).unwrap();
                }
            }
        }
    }
    out
}
