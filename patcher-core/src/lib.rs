use std::fs;
use std::path::Path;

use thiserror::Error;

pub mod baseline;
pub mod changes;
pub mod layout;
pub mod ppf;
pub mod resolver;
pub mod sector;
pub mod text;
pub mod tilemap;
pub mod validate;
pub mod writes;

use baseline::{AddressMap, Baseline};
use changes::{Aliases, ChangeSet};
use writes::Endian;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unsupported scalar type: {0}")]
    UnsupportedScalarType(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("string {text:?} does not fit in {capacity} bytes")]
    StringCapacity { text: String, capacity: usize },
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("patch truncated at offset {offset}")]
    TruncatedPatch { offset: usize },
}

pub type Result<T> = std::result::Result<T, PatchError>;

/// Validates a change-set and resolves it against the baseline into
/// serialized patch bytes. All-or-nothing: any error leaves no
/// partial output behind.
pub fn build_patch(
    baseline: &Baseline,
    changes: &ChangeSet,
    aliases: &Aliases,
    description: &str,
    endian: Endian,
) -> Result<Vec<u8>> {
    validate::check(baseline, changes, aliases)?;
    let map = resolver::resolve(baseline, changes, aliases, endian)?;
    Ok(ppf::encode(&map, description))
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        PatchError::Config(format!("{} {}: {}", what, path.display(), e))
    })
}

pub fn load_baseline(path: &Path) -> Result<Baseline> {
    load_json(path, "baseline document")
}

pub fn load_change_set(path: &Path) -> Result<ChangeSet> {
    load_json(path, "change-set document")
}

pub fn load_aliases(path: &Path) -> Result<Aliases> {
    load_json(path, "alias document")
}

pub fn load_address_map(path: &Path) -> Result<AddressMap> {
    load_json(path, "address-map document")
}

pub fn save_baseline(path: &Path, baseline: &Baseline) -> Result<()> {
    let raw = serde_json::to_string_pretty(baseline)
        .map_err(|e| PatchError::Config(format!("serializing baseline: {}", e)))?;
    fs::write(path, raw)?;
    Ok(())
}
