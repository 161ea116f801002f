// Entity layout repacking. Each stage carries a table of per-row
// entity lists, stored twice: once sorted horizontally and once
// vertically, every row bounded by a (-2,-2) start sentinel carrying
// the row's fixed parameter and a (-1,-1) end sentinel. Edits add,
// update or delete entities; the table is then re-flattened and only
// the bytes that differ from the baseline image become writes.

use serde::{Deserialize, Serialize};

use crate::baseline::LayoutTableBaseline;
use crate::changes::LayoutEdit;
use crate::sector::gamedata_to_disc;
use crate::writes::{Endian, ScalarType, WriteMap};
use crate::{PatchError, Result};

pub const ENTITY_SIZE: usize = 10;

pub const SENTINEL_START: i16 = -2;
pub const SENTINEL_END: i16 = -1;

/// One fixed-width entity record: five little-endian u16 fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub x: i16,
    pub y: i16,
    pub kind: u16,
    pub slot: u16,
    pub params: u16,
}

impl Entity {
    pub fn read(image: &[u8], address: u64) -> Result<Entity> {
        let mut fields = [0u16; 5];
        for (i, field) in fields.iter_mut().enumerate() {
            let mut raw = [0u8; 2];
            for (j, byte) in raw.iter_mut().enumerate() {
                let disc = gamedata_to_disc(address + (i * 2 + j) as u64) as usize;
                *byte = *image.get(disc).ok_or_else(|| {
                    PatchError::Config(format!(
                        "entity record at 0x{:X} lies past the end of the image",
                        address
                    ))
                })?;
            }
            *field = u16::from_le_bytes(raw);
        }
        Ok(Entity {
            x: fields[0] as i16,
            y: fields[1] as i16,
            kind: fields[2],
            slot: fields[3],
            params: fields[4],
        })
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.x as u16).to_le_bytes());
        out.extend_from_slice(&(self.y as u16).to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.slot.to_le_bytes());
        out.extend_from_slice(&self.params.to_le_bytes());
    }
}

pub fn start_sentinel(param: u16) -> Entity {
    Entity {
        x: SENTINEL_START,
        y: SENTINEL_START,
        kind: 0,
        slot: 0,
        params: param,
    }
}

pub fn end_sentinel() -> Entity {
    Entity {
        x: SENTINEL_END,
        y: SENTINEL_END,
        kind: 0,
        slot: 0,
        params: 0,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Orientation {
    Horizontal,
    Vertical,
}

fn sort_entities(entities: &mut [Entity], orientation: Orientation) {
    // Stable, so entities equal on the whole key keep baseline order.
    match orientation {
        Orientation::Horizontal => {
            entities.sort_by_key(|e| (e.x, e.y, e.slot, e.kind, e.params))
        }
        Orientation::Vertical => {
            entities.sort_by_key(|e| (e.y, e.x, e.slot, e.kind, e.params))
        }
    }
}

fn flatten_row(entities: &[Entity], sentinel_param: u16, out: &mut Vec<u8>) {
    start_sentinel(sentinel_param).write_into(out);
    for entity in entities {
        entity.write_into(out);
    }
    end_sentinel().write_into(out);
}

/// Applies the change-set's edits to a copy of the baseline rows.
fn edited_rows(table: &LayoutTableBaseline, edits: &[LayoutEdit]) -> Result<Vec<Vec<Entity>>> {
    let mut rows: Vec<Vec<Entity>> = table.rows.iter().map(|r| r.entities.clone()).collect();

    fn row_of(rows: &mut [Vec<Entity>], index: usize) -> Result<&mut Vec<Entity>> {
        let count = rows.len();
        rows.get_mut(index).ok_or_else(|| {
            PatchError::Config(format!(
                "layout edit names row {} but the table has {} rows",
                index, count
            ))
        })
    }

    for edit in edits {
        match edit {
            LayoutEdit::Add { row, entity } => {
                row_of(&mut rows, *row)?.push(*entity);
            }
            LayoutEdit::Update {
                row,
                index,
                x,
                y,
                kind,
                slot,
                params,
            } => {
                let entities = row_of(&mut rows, *row)?;
                let entity = entities.get_mut(*index).ok_or_else(|| {
                    PatchError::Config(format!(
                        "layout edit names entity {} in row {} but the row has fewer",
                        index, row
                    ))
                })?;
                if let Some(x) = x {
                    entity.x = *x;
                }
                if let Some(y) = y {
                    entity.y = *y;
                }
                if let Some(kind) = kind {
                    entity.kind = *kind;
                }
                if let Some(slot) = slot {
                    entity.slot = *slot;
                }
                if let Some(params) = params {
                    entity.params = *params;
                }
            }
            LayoutEdit::Delete { row, index } => {
                let entities = row_of(&mut rows, *row)?;
                if *index >= entities.len() {
                    return Err(PatchError::Config(format!(
                        "layout edit deletes entity {} in row {} but the row has fewer",
                        index, row
                    )));
                }
                entities.remove(*index);
            }
        }
    }

    Ok(rows)
}

/// Flattens every row sequentially from `base`, returning the table
/// image and each row's recomputed starting address.
fn flatten_table(
    rows: &[Vec<Entity>],
    sentinel_params: &[u16],
    base: u64,
    orientation: Orientation,
) -> (Vec<u8>, Vec<u64>) {
    let mut image = Vec::new();
    let mut offsets = Vec::with_capacity(rows.len());
    for (row, &param) in rows.iter().zip(sentinel_params) {
        offsets.push(base + image.len() as u64);
        let mut sorted = row.clone();
        sort_entities(&mut sorted, orientation);
        flatten_row(&sorted, param, &mut image);
    }
    (image, offsets)
}

fn emit_table_writes(
    map: &mut WriteMap,
    base: u64,
    baseline_image: &[u8],
    new_image: &[u8],
) {
    for (i, &byte) in new_image.iter().enumerate() {
        if baseline_image.get(i).copied() != Some(byte) {
            map.write_byte(gamedata_to_disc(base + i as u64), byte);
        }
    }
}

/// Repacks a stage's entity table after edits, emitting pointer
/// rewrites for rows whose start moved and byte writes for every
/// flattened byte that differs from the baseline table image.
pub fn repack(
    map: &mut WriteMap,
    table: &LayoutTableBaseline,
    edits: &[LayoutEdit],
    endian: Endian,
) -> Result<()> {
    let rows = edited_rows(table, edits)?;
    let baseline_rows: Vec<Vec<Entity>> =
        table.rows.iter().map(|r| r.entities.clone()).collect();
    let sentinel_params: Vec<u16> = table.rows.iter().map(|r| r.sentinel_param).collect();

    for orientation in [Orientation::Horizontal, Orientation::Vertical] {
        let base = match orientation {
            Orientation::Horizontal => table.horizontal_base,
            Orientation::Vertical => table.vertical_base,
        };
        let (baseline_image, _) =
            flatten_table(&baseline_rows, &sentinel_params, base, orientation);
        let (new_image, offsets) = flatten_table(&rows, &sentinel_params, base, orientation);

        for (row, &offset) in table.rows.iter().zip(&offsets) {
            let pointer = match orientation {
                Orientation::Horizontal => &row.horizontal_pointer,
                Orientation::Vertical => &row.vertical_pointer,
            };
            if pointer.value != offset as i64 {
                map.write_typed(pointer.address, offset as i64, pointer.kind, endian);
            }
        }

        emit_table_writes(map, base, &baseline_image, &new_image);
    }

    Ok(())
}
