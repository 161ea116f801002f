// Change-set and alias/dependents documents. A change-set declares
// desired field overrides relative to the baseline; the alias document
// maps human-readable room names to baseline indices and carries the
// static Dependent rules that propagate room moves into the rest of
// the image.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::layout::Entity;
use crate::writes::ScalarType;
use crate::{PatchError, Result};

/// A room named either by baseline index or through the alias table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomLocator {
    Index(usize),
    Name(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomChange {
    pub room: RoomLocator,
    #[serde(default)]
    pub left: Option<i64>,
    #[serde(default)]
    pub top: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeleporterChange {
    pub teleporter: usize,
    #[serde(default)]
    pub x: Option<i64>,
    #[serde(default)]
    pub y: Option<i64>,
    #[serde(default)]
    pub dest_stage: Option<i64>,
    #[serde(default)]
    pub dest_room: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BossTeleporterChange {
    pub boss_teleporter: usize,
    #[serde(default)]
    pub stage: Option<i64>,
    #[serde(default)]
    pub room: Option<i64>,
    #[serde(default)]
    pub x: Option<i64>,
    #[serde(default)]
    pub y: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FamiliarEventChange {
    pub event: usize,
    #[serde(default)]
    pub x: Option<i64>,
    #[serde(default)]
    pub y: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StringChange {
    pub name: String,
    pub text: String,
}

/// One layer override. Cells are authored sparsely: `null` means
/// "copy the baseline cell unchanged".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TilemapChange {
    pub room: usize,
    pub layer: usize,
    pub cells: Vec<Option<u16>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LayoutEdit {
    Add {
        row: usize,
        entity: Entity,
    },
    Update {
        row: usize,
        index: usize,
        #[serde(default)]
        x: Option<i16>,
        #[serde(default)]
        y: Option<i16>,
        #[serde(default)]
        kind: Option<u16>,
        #[serde(default)]
        slot: Option<u16>,
        #[serde(default)]
        params: Option<u16>,
    },
    Delete {
        row: usize,
        index: usize,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StageChanges {
    pub stage: usize,
    #[serde(default)]
    pub rooms: Vec<RoomChange>,
    #[serde(default)]
    pub teleporters: Vec<TeleporterChange>,
    #[serde(default)]
    pub boss_teleporters: Vec<BossTeleporterChange>,
    #[serde(default)]
    pub familiar_events: Vec<FamiliarEventChange>,
    #[serde(default)]
    pub strings: Vec<StringChange>,
    #[serde(default)]
    pub tilemaps: Vec<TilemapChange>,
    #[serde(default)]
    pub layout_edits: Vec<LayoutEdit>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub stages: Vec<StageChanges>,
}

// ---------------------------------------------------------------------------
// Aliases and dependent rules.

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RoomRef {
    pub stage: usize,
    pub room: usize,
}

/// Which geometry field of the moved room feeds a dependent.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomAxis {
    Left,
    Top,
    Right,
    Bottom,
}

/// Value transform applied before a dependent's write. The variants
/// cover the three shapes dependents need: a constant offset, an
/// indexed table, and a signed flip around a fixed origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transform {
    Identity,
    Add { amount: i64 },
    Table { entries: Vec<i64> },
    Flip { origin: i64 },
}

impl Transform {
    pub fn apply(&self, value: i64) -> Result<i64> {
        match self {
            Transform::Identity => Ok(value),
            Transform::Add { amount } => Ok(value + amount),
            Transform::Table { entries } => {
                let index = usize::try_from(value).ok().and_then(|i| entries.get(i));
                index.copied().ok_or_else(|| {
                    PatchError::Config(format!(
                        "transform table has no entry for value {}",
                        value
                    ))
                })
            }
            Transform::Flip { origin } => Ok(origin - value),
        }
    }
}

/// A rule triggered when its owning room's geometry changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dependent {
    /// Synthesizes a room change in another stage, keeping the two
    /// rooms aligned; the target stage is enqueued for processing.
    Room {
        stage: usize,
        room: usize,
        source: RoomAxis,
        transform: Transform,
    },
    /// Marks the room's cell on the map-reveal bitmap: one bit per
    /// room cell, eight cells per byte, eight bytes per map row.
    SecretMapTile { base: u64 },
    /// Rewrites a warp-room coordinate entry.
    WarpCoordinate {
        address: u64,
        #[serde(rename = "type")]
        kind: ScalarType,
        source: RoomAxis,
        transform: Transform,
    },
    /// Appends a synthesized familiar event change so the event
    /// follows the room.
    FamiliarEvent {
        stage: usize,
        event: usize,
        transform: Transform,
    },
    /// Arbitrary hardcoded write derived from the room's geometry.
    DirectWrite {
        address: u64,
        #[serde(rename = "type")]
        kind: ScalarType,
        source: RoomAxis,
        transform: Transform,
    },
    /// Rewrites the room's tile-layout definition record, which
    /// duplicates the room's map position.
    TileLayout {
        left_address: u64,
        top_address: u64,
        right_address: u64,
        bottom_address: u64,
        #[serde(rename = "type")]
        kind: ScalarType,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomDependents {
    pub stage: usize,
    pub room: usize,
    pub rules: Vec<Dependent>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Aliases {
    /// Human-readable room names bound to baseline indices.
    #[serde(default)]
    pub rooms: BTreeMap<String, RoomRef>,
    #[serde(default)]
    pub dependents: Vec<RoomDependents>,
}

impl Aliases {
    /// Resolves a change-set room locator within `stage`.
    pub fn resolve_room(&self, stage: usize, locator: &RoomLocator) -> Result<usize> {
        match locator {
            RoomLocator::Index(index) => Ok(*index),
            RoomLocator::Name(name) => {
                let room = self.rooms.get(name).ok_or_else(|| {
                    PatchError::UnresolvedReference(name.clone())
                })?;
                if room.stage != stage {
                    return Err(PatchError::UnresolvedReference(format!(
                        "{} names a room in stage {}, not stage {}",
                        name, room.stage, stage
                    )));
                }
                Ok(room.room)
            }
        }
    }

    pub fn dependents_of(&self, stage: usize, room: usize) -> &[Dependent] {
        self.dependents
            .iter()
            .find(|d| d.stage == stage && d.room == room)
            .map(|d| d.rules.as_slice())
            .unwrap_or(&[])
    }
}
