// Baseline extraction documents. A baseline records, for every field
// of interest, the value the unmodified image carries together with
// the gamedata address and scalar kind it is encoded as. The resolver
// only ever emits a write when a requested value differs from one of
// these records.

use serde::{Deserialize, Serialize};

use crate::layout::Entity;
use crate::sector::gamedata_to_disc;
use crate::text::TextEncoding;
use crate::writes::{Endian, ScalarType};
use crate::{PatchError, Result};

/// One extracted fact: `value` is stored at `address` as `kind`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypedValue {
    pub value: i64,
    pub address: u64,
    pub kind: ScalarType,
}

impl TypedValue {
    /// Physical location of the first byte of this field.
    pub fn disc_address(&self) -> u64 {
        gamedata_to_disc(self.address)
    }

    /// Reads a typed value out of a raw disc image, byte by byte
    /// through the sector mapping.
    pub fn read(image: &[u8], address: u64, kind: ScalarType, endian: Endian) -> Result<TypedValue> {
        let size = kind.size();
        let mut raw: u64 = 0;
        for i in 0..size {
            let disc = gamedata_to_disc(address + i as u64) as usize;
            let byte = *image.get(disc).ok_or_else(|| {
                PatchError::Config(format!(
                    "gamedata address 0x{:X} lies past the end of the image",
                    address + i as u64
                ))
            })? as u64;
            let shift = match endian {
                Endian::Little => i * 8,
                Endian::Big => (size - 1 - i) * 8,
            };
            raw |= byte << shift;
        }

        let value = match kind {
            ScalarType::U8 | ScalarType::U16 | ScalarType::U32 => raw as i64,
            ScalarType::S8 => raw as u8 as i8 as i64,
            ScalarType::S16 => raw as u16 as i16 as i64,
            ScalarType::S32 => raw as u32 as i32 as i64,
        };

        Ok(TypedValue {
            value,
            address,
            kind,
        })
    }
}

/// Room geometry as extracted. Width and height are derived, not
/// stored; moving a room preserves both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomBaseline {
    pub left: TypedValue,
    pub top: TypedValue,
    pub right: TypedValue,
    pub bottom: TypedValue,
}

impl RoomBaseline {
    pub fn width(&self) -> i64 {
        self.right.value - self.left.value + 1
    }

    pub fn height(&self) -> i64 {
        self.bottom.value - self.top.value + 1
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeleporterBaseline {
    pub x: TypedValue,
    pub y: TypedValue,
    pub dest_stage: TypedValue,
    pub dest_room: TypedValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BossTeleporterBaseline {
    pub stage: TypedValue,
    pub room: TypedValue,
    pub x: TypedValue,
    pub y: TypedValue,
}

/// Familiar event entries carry the room coordinates an event fires
/// in; they track the room when dependency propagation moves it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FamiliarEventBaseline {
    pub x: TypedValue,
    pub y: TypedValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StringBaseline {
    pub name: String,
    pub address: u64,
    pub capacity: usize,
    pub encoding: TextEncoding,
    /// The encoded bytes as present on the unmodified image, used to
    /// drop unchanged bytes from the patch.
    pub bytes: Vec<u8>,
}

/// One layer of one room's tile grid, row-major u16 cells.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TilemapBaseline {
    pub room: usize,
    pub layer: usize,
    pub address: u64,
    pub width: usize,
    pub height: usize,
    pub cells: Vec<u16>,
}

/// One row of a stage's entity table plus the pointer-table entries
/// that locate it in the horizontally and vertically sorted copies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutRowBaseline {
    pub sentinel_param: u16,
    pub horizontal_pointer: TypedValue,
    pub vertical_pointer: TypedValue,
    pub entities: Vec<Entity>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutTableBaseline {
    pub horizontal_base: u64,
    pub vertical_base: u64,
    pub rows: Vec<LayoutRowBaseline>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageBaseline {
    pub name: String,
    #[serde(default)]
    pub rooms: Vec<RoomBaseline>,
    #[serde(default)]
    pub teleporters: Vec<TeleporterBaseline>,
    #[serde(default)]
    pub boss_teleporters: Vec<BossTeleporterBaseline>,
    #[serde(default)]
    pub familiar_events: Vec<FamiliarEventBaseline>,
    #[serde(default)]
    pub strings: Vec<StringBaseline>,
    #[serde(default)]
    pub tilemaps: Vec<TilemapBaseline>,
    #[serde(default)]
    pub layout: Option<LayoutTableBaseline>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Baseline {
    pub stages: Vec<StageBaseline>,
}

impl Baseline {
    pub fn stage(&self, index: usize) -> Result<&StageBaseline> {
        self.stages.get(index).ok_or_else(|| {
            PatchError::Config(format!("stage index {} out of range", index))
        })
    }
}

// ---------------------------------------------------------------------------
// Extraction: reading a baseline out of a disc image, driven by the
// static address-map catalog for a particular game build.

/// A field location in the address-map catalog. Kind names are plain
/// strings there so a bad catalog surfaces as UnsupportedScalarType.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldRef {
    pub address: u64,
    pub kind: String,
}

impl FieldRef {
    fn read(&self, image: &[u8], endian: Endian) -> Result<TypedValue> {
        let kind = ScalarType::parse(&self.kind)?;
        TypedValue::read(image, self.address, kind, endian)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomMap {
    pub left: FieldRef,
    pub top: FieldRef,
    pub right: FieldRef,
    pub bottom: FieldRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeleporterMap {
    pub x: FieldRef,
    pub y: FieldRef,
    pub dest_stage: FieldRef,
    pub dest_room: FieldRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BossTeleporterMap {
    pub stage: FieldRef,
    pub room: FieldRef,
    pub x: FieldRef,
    pub y: FieldRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FamiliarEventMap {
    pub x: FieldRef,
    pub y: FieldRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StringMap {
    pub name: String,
    pub address: u64,
    pub capacity: usize,
    pub encoding: TextEncoding,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TilemapMap {
    pub room: usize,
    pub layer: usize,
    pub address: u64,
    pub width: usize,
    pub height: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutRowMap {
    pub sentinel_param: u16,
    pub horizontal_pointer: FieldRef,
    pub vertical_pointer: FieldRef,
    /// Entity count excluding the two sentinels.
    pub entity_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutTableMap {
    pub horizontal_base: u64,
    pub vertical_base: u64,
    pub rows: Vec<LayoutRowMap>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageMap {
    pub name: String,
    #[serde(default)]
    pub rooms: Vec<RoomMap>,
    #[serde(default)]
    pub teleporters: Vec<TeleporterMap>,
    #[serde(default)]
    pub boss_teleporters: Vec<BossTeleporterMap>,
    #[serde(default)]
    pub familiar_events: Vec<FamiliarEventMap>,
    #[serde(default)]
    pub strings: Vec<StringMap>,
    #[serde(default)]
    pub tilemaps: Vec<TilemapMap>,
    #[serde(default)]
    pub layout: Option<LayoutTableMap>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressMap {
    pub stages: Vec<StageMap>,
}

fn read_gamedata_bytes(image: &[u8], address: u64, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let disc = gamedata_to_disc(address + i as u64) as usize;
        let byte = *image.get(disc).ok_or_else(|| {
            PatchError::Config(format!(
                "gamedata address 0x{:X} lies past the end of the image",
                address + i as u64
            ))
        })?;
        out.push(byte);
    }
    Ok(out)
}

fn extract_entities(image: &[u8], base: u64, count: usize) -> Result<Vec<Entity>> {
    // Rows start with the (-2, -2) sentinel; entities follow it.
    let mut entities = Vec::with_capacity(count);
    for i in 0..count {
        let addr = base + ((i + 1) * crate::layout::ENTITY_SIZE) as u64;
        entities.push(Entity::read(image, addr)?);
    }
    Ok(entities)
}

/// Harvests a full baseline document from a raw disc image.
pub fn extract(image: &[u8], map: &AddressMap, endian: Endian) -> Result<Baseline> {
    let mut stages = Vec::with_capacity(map.stages.len());
    for stage in &map.stages {
        let rooms = stage
            .rooms
            .iter()
            .map(|r| {
                Ok(RoomBaseline {
                    left: r.left.read(image, endian)?,
                    top: r.top.read(image, endian)?,
                    right: r.right.read(image, endian)?,
                    bottom: r.bottom.read(image, endian)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let teleporters = stage
            .teleporters
            .iter()
            .map(|t| {
                Ok(TeleporterBaseline {
                    x: t.x.read(image, endian)?,
                    y: t.y.read(image, endian)?,
                    dest_stage: t.dest_stage.read(image, endian)?,
                    dest_room: t.dest_room.read(image, endian)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let boss_teleporters = stage
            .boss_teleporters
            .iter()
            .map(|t| {
                Ok(BossTeleporterBaseline {
                    stage: t.stage.read(image, endian)?,
                    room: t.room.read(image, endian)?,
                    x: t.x.read(image, endian)?,
                    y: t.y.read(image, endian)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let familiar_events = stage
            .familiar_events
            .iter()
            .map(|e| {
                Ok(FamiliarEventBaseline {
                    x: e.x.read(image, endian)?,
                    y: e.y.read(image, endian)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let strings = stage
            .strings
            .iter()
            .map(|s| {
                Ok(StringBaseline {
                    name: s.name.clone(),
                    address: s.address,
                    capacity: s.capacity,
                    encoding: s.encoding,
                    bytes: read_gamedata_bytes(image, s.address, s.capacity)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tilemaps = stage
            .tilemaps
            .iter()
            .map(|t| {
                let raw = read_gamedata_bytes(image, t.address, t.width * t.height * 2)?;
                let cells = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                Ok(TilemapBaseline {
                    room: t.room,
                    layer: t.layer,
                    address: t.address,
                    width: t.width,
                    height: t.height,
                    cells,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let layout = match &stage.layout {
            None => None,
            Some(table) => {
                let mut rows = Vec::with_capacity(table.rows.len());
                for row in &table.rows {
                    let horizontal_pointer = row.horizontal_pointer.read(image, endian)?;
                    let entities = extract_entities(
                        image,
                        horizontal_pointer.value as u64,
                        row.entity_count,
                    )?;
                    rows.push(LayoutRowBaseline {
                        sentinel_param: row.sentinel_param,
                        horizontal_pointer,
                        vertical_pointer: row.vertical_pointer.read(image, endian)?,
                        entities,
                    });
                }
                Some(LayoutTableBaseline {
                    horizontal_base: table.horizontal_base,
                    vertical_base: table.vertical_base,
                    rows,
                })
            }
        };

        stages.push(StageBaseline {
            name: stage.name.clone(),
            rooms,
            teleporters,
            boss_teleporters,
            familiar_events,
            strings,
            tilemaps,
            layout,
        });
    }
    Ok(Baseline { stages })
}

#[cfg(test)]
mod tests {
    use super::*;

    // A tiny image: one full sector, data region filled with a
    // recognisable ramp so typed reads have known answers.
    fn test_image() -> Vec<u8> {
        let mut image = vec![0u8; 2352 * 2];
        for i in 0..2048usize {
            image[24 + i] = (i % 251) as u8;
        }
        image
    }

    #[test]
    fn reads_typed_values_through_the_sector_mapping() {
        let image = test_image();
        let v = TypedValue::read(&image, 0, ScalarType::U16, Endian::Little).unwrap();
        assert_eq!(v.value, 0x0100);
        assert_eq!(v.disc_address(), 24);

        let v = TypedValue::read(&image, 2, ScalarType::S8, Endian::Little).unwrap();
        assert_eq!(v.value, 2);
    }

    #[test]
    fn sign_extends_signed_kinds() {
        let mut image = test_image();
        image[24] = 0xFE;
        image[25] = 0xFF;
        let v = TypedValue::read(&image, 0, ScalarType::S16, Endian::Little).unwrap();
        assert_eq!(v.value, -2);
        let v = TypedValue::read(&image, 0, ScalarType::U16, Endian::Little).unwrap();
        assert_eq!(v.value, 0xFFFE);
    }

    #[test]
    fn read_past_end_of_image_is_an_error() {
        let image = test_image();
        assert!(TypedValue::read(&image, 4096, ScalarType::U8, Endian::Little).is_err());
    }

    #[test]
    fn room_width_and_height_are_derived() {
        let tv = |value| TypedValue {
            value,
            address: 0,
            kind: ScalarType::U8,
        };
        let room = RoomBaseline {
            left: tv(5),
            top: tv(10),
            right: tv(8),
            bottom: tv(15),
        };
        assert_eq!(room.width(), 4);
        assert_eq!(room.height(), 6);
    }

    #[test]
    fn extract_reads_rooms_and_strings() {
        let mut image = test_image();
        // Room at gamedata 0x10: left 5, top 10, right 8, bottom 15.
        image[24 + 0x10] = 5;
        image[24 + 0x11] = 10;
        image[24 + 0x12] = 8;
        image[24 + 0x13] = 15;

        let field = |address, kind: &str| FieldRef {
            address,
            kind: kind.to_string(),
        };
        let map = AddressMap {
            stages: vec![StageMap {
                name: "Entrance".to_string(),
                rooms: vec![RoomMap {
                    left: field(0x10, "u8"),
                    top: field(0x11, "u8"),
                    right: field(0x12, "u8"),
                    bottom: field(0x13, "u8"),
                }],
                teleporters: vec![],
                boss_teleporters: vec![],
                familiar_events: vec![],
                strings: vec![StringMap {
                    name: "stage name".to_string(),
                    address: 0x40,
                    capacity: 8,
                    encoding: TextEncoding::Menu,
                }],
                tilemaps: vec![],
                layout: None,
            }],
        };

        let baseline = extract(&image, &map, Endian::Little).unwrap();
        let stage = &baseline.stages[0];
        assert_eq!(stage.rooms[0].left.value, 5);
        assert_eq!(stage.rooms[0].bottom.value, 15);
        assert_eq!(stage.strings[0].bytes.len(), 8);
    }

    #[test]
    fn bad_kind_name_in_catalog_is_unsupported_scalar() {
        let image = test_image();
        let map = AddressMap {
            stages: vec![StageMap {
                name: "x".to_string(),
                rooms: vec![RoomMap {
                    left: FieldRef {
                        address: 0,
                        kind: "f32".to_string(),
                    },
                    top: FieldRef {
                        address: 1,
                        kind: "u8".to_string(),
                    },
                    right: FieldRef {
                        address: 2,
                        kind: "u8".to_string(),
                    },
                    bottom: FieldRef {
                        address: 3,
                        kind: "u8".to_string(),
                    },
                }],
                teleporters: vec![],
                boss_teleporters: vec![],
                familiar_events: vec![],
                strings: vec![],
                tilemaps: vec![],
                layout: None,
            }],
        };
        match extract(&image, &map, Endian::Little) {
            Err(crate::PatchError::UnsupportedScalarType(kind)) => assert_eq!(kind, "f32"),
            other => panic!("expected unsupported scalar, got {:?}", other.map(|_| ())),
        }
    }
}
