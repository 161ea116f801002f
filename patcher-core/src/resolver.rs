// Change resolution. A FIFO worklist of stage indices is seeded from
// the change-set; moving a room fires its dependent rules, which can
// write directly, or synthesize follow-up changes for other stages
// and re-enqueue them. Synthesized changes live in their own queue so
// the input change-set is never mutated. Every field write funnels
// through maybe_write, which drops values that already match the
// baseline, so re-processing a stage is harmless and patches stay
// minimal.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::baseline::{Baseline, RoomBaseline, StageBaseline, TypedValue};
use crate::changes::{
    Aliases, ChangeSet, Dependent, FamiliarEventChange, RoomAxis, StageChanges,
};
use crate::writes::{Endian, ScalarType, WriteMap};
use crate::{layout, text, tilemap};
use crate::{PatchError, Result};

/// Emits a typed write only when `new` differs from the baseline
/// value. Returns whether a write was emitted.
pub fn maybe_write(map: &mut WriteMap, field: &TypedValue, new: i64, endian: Endian) -> bool {
    if new == field.value {
        return false;
    }
    map.write_typed(field.address, new, field.kind, endian);
    true
}

/// The geometry a room ends up with after a change, all four fields
/// concrete. Width and height are preserved from the baseline.
#[derive(Copy, Clone, Debug)]
struct RoomGeometry {
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
}

impl RoomGeometry {
    fn of(room: &RoomBaseline, left: Option<i64>, top: Option<i64>) -> RoomGeometry {
        let left = left.unwrap_or(room.left.value);
        let top = top.unwrap_or(room.top.value);
        RoomGeometry {
            left,
            top,
            right: left + room.width() - 1,
            bottom: top + room.height() - 1,
        }
    }

    fn axis(&self, axis: RoomAxis) -> i64 {
        match axis {
            RoomAxis::Left => self.left,
            RoomAxis::Top => self.top,
            RoomAxis::Right => self.right,
            RoomAxis::Bottom => self.bottom,
        }
    }
}

/// Synthesized change intents, kept apart from the authored
/// change-set and drained when their stage is processed.
#[derive(Default)]
struct Synthesized {
    rooms: Vec<(usize, Option<i64>, Option<i64>)>,
    familiar_events: Vec<FamiliarEventChange>,
}

struct Resolver<'a> {
    baseline: &'a Baseline,
    changes: &'a ChangeSet,
    aliases: &'a Aliases,
    endian: Endian,
    map: WriteMap,
    queue: VecDeque<usize>,
    pending: BTreeMap<usize, Synthesized>,
    /// Rooms whose dependents already fired this run; the guard that
    /// bounds propagation.
    fired: HashSet<(usize, usize)>,
}

impl<'a> Resolver<'a> {
    fn new(
        baseline: &'a Baseline,
        changes: &'a ChangeSet,
        aliases: &'a Aliases,
        endian: Endian,
    ) -> Resolver<'a> {
        Resolver {
            baseline,
            changes,
            aliases,
            endian,
            map: WriteMap::new(),
            queue: changes.stages.iter().map(|s| s.stage).collect(),
            pending: BTreeMap::new(),
            fired: HashSet::new(),
        }
    }

    fn run(mut self) -> Result<WriteMap> {
        while let Some(stage_index) = self.queue.pop_front() {
            self.process_stage(stage_index)?;
        }
        Ok(self.map)
    }

    fn process_stage(&mut self, stage_index: usize) -> Result<()> {
        let stage = self.baseline.stage(stage_index)?;

        // Authored changes for this stage. A stage may be enqueued
        // more than once; recomputation is idempotent.
        let authored: Vec<&StageChanges> = self
            .changes
            .stages
            .iter()
            .filter(|s| s.stage == stage_index)
            .collect();

        for stage_changes in &authored {
            for change in &stage_changes.rooms {
                let room_index = self.aliases.resolve_room(stage_index, &change.room)?;
                self.move_room(stage_index, stage, room_index, change.left, change.top)?;
            }
        }

        let synthesized = self.pending.remove(&stage_index).unwrap_or_default();
        for (room_index, left, top) in synthesized.rooms {
            self.move_room(stage_index, stage, room_index, left, top)?;
        }

        for stage_changes in &authored {
            for change in &stage_changes.teleporters {
                let teleporter = &stage.teleporters[change.teleporter];
                for (field, new) in [
                    (&teleporter.x, change.x),
                    (&teleporter.y, change.y),
                    (&teleporter.dest_stage, change.dest_stage),
                    (&teleporter.dest_room, change.dest_room),
                ] {
                    if let Some(new) = new {
                        maybe_write(&mut self.map, field, new, self.endian);
                    }
                }
            }

            for change in &stage_changes.boss_teleporters {
                let teleporter = &stage.boss_teleporters[change.boss_teleporter];
                for (field, new) in [
                    (&teleporter.stage, change.stage),
                    (&teleporter.room, change.room),
                    (&teleporter.x, change.x),
                    (&teleporter.y, change.y),
                ] {
                    if let Some(new) = new {
                        maybe_write(&mut self.map, field, new, self.endian);
                    }
                }
            }

            for change in &stage_changes.familiar_events {
                self.patch_familiar_event(stage, change)?;
            }

            for change in &stage_changes.strings {
                self.patch_string(stage_index, stage, &change.name, &change.text)?;
            }

            for change in &stage_changes.tilemaps {
                let found = stage
                    .tilemaps
                    .iter()
                    .find(|t| t.room == change.room && t.layer == change.layer);
                let baseline_map = found.ok_or_else(|| {
                    PatchError::Config(format!(
                        "stage {}: no tilemap for room {} layer {}",
                        stage_index, change.room, change.layer
                    ))
                })?;
                let source = tilemap::TileGrid {
                    width: baseline_map.width,
                    height: baseline_map.height,
                    cells: baseline_map.cells.clone(),
                };
                let resolved = tilemap::reconcile(&source, &change.cells)?;
                tilemap::emit_writes(
                    &mut self.map,
                    baseline_map.address,
                    &source,
                    &resolved,
                    self.endian,
                );
            }

            if !stage_changes.layout_edits.is_empty() {
                let table = stage.layout.as_ref().ok_or_else(|| {
                    PatchError::Config(format!(
                        "stage {} has no entity table to edit",
                        stage_index
                    ))
                })?;
                layout::repack(
                    &mut self.map,
                    table,
                    &stage_changes.layout_edits,
                    self.endian,
                )?;
            }
        }

        for change in synthesized.familiar_events {
            self.patch_familiar_event(stage, &change)?;
        }

        Ok(())
    }

    fn move_room(
        &mut self,
        stage_index: usize,
        stage: &StageBaseline,
        room_index: usize,
        left: Option<i64>,
        top: Option<i64>,
    ) -> Result<()> {
        let room = stage.rooms.get(room_index).ok_or_else(|| {
            PatchError::Config(format!(
                "stage {}: room {} does not exist",
                stage_index, room_index
            ))
        })?;
        let geometry = RoomGeometry::of(room, left, top);

        maybe_write(&mut self.map, &room.left, geometry.left, self.endian);
        maybe_write(&mut self.map, &room.top, geometry.top, self.endian);
        maybe_write(&mut self.map, &room.right, geometry.right, self.endian);
        maybe_write(&mut self.map, &room.bottom, geometry.bottom, self.endian);

        let moved =
            geometry.left != room.left.value || geometry.top != room.top.value;
        if moved && self.fired.insert((stage_index, room_index)) {
            let rules = self.aliases.dependents_of(stage_index, room_index).to_vec();
            for rule in &rules {
                self.apply_dependent(rule, geometry)?;
            }
        }
        Ok(())
    }

    fn apply_dependent(&mut self, rule: &Dependent, geometry: RoomGeometry) -> Result<()> {
        match rule {
            Dependent::Room {
                stage,
                room,
                source,
                transform,
            } => {
                let value = transform.apply(geometry.axis(*source))?;
                let (left, top) = match source {
                    RoomAxis::Left | RoomAxis::Right => (Some(value), None),
                    RoomAxis::Top | RoomAxis::Bottom => (None, Some(value)),
                };
                self.pending
                    .entry(*stage)
                    .or_default()
                    .rooms
                    .push((*room, left, top));
                self.queue.push_back(*stage);
            }
            Dependent::SecretMapTile { base } => {
                let (left, top) = (geometry.left, geometry.top);
                if !(0..64).contains(&left) || !(0..64).contains(&top) {
                    return Err(PatchError::Config(format!(
                        "secret map tile for room at ({}, {}) is off the map",
                        left, top
                    )));
                }
                let offset = top as u64 * 8 + left as u64 / 8;
                let bit = 1i64 << (left % 8);
                self.map
                    .write_typed(base + offset, bit, ScalarType::U8, self.endian);
            }
            Dependent::WarpCoordinate {
                address,
                kind,
                source,
                transform,
            }
            | Dependent::DirectWrite {
                address,
                kind,
                source,
                transform,
            } => {
                let value = transform.apply(geometry.axis(*source))?;
                self.map.write_typed(*address, value, *kind, self.endian);
            }
            Dependent::FamiliarEvent {
                stage,
                event,
                transform,
            } => {
                let change = FamiliarEventChange {
                    event: *event,
                    x: Some(transform.apply(geometry.left)?),
                    y: Some(transform.apply(geometry.top)?),
                };
                self.pending
                    .entry(*stage)
                    .or_default()
                    .familiar_events
                    .push(change);
                self.queue.push_back(*stage);
            }
            Dependent::TileLayout {
                left_address,
                top_address,
                right_address,
                bottom_address,
                kind,
            } => {
                for (address, value) in [
                    (left_address, geometry.left),
                    (top_address, geometry.top),
                    (right_address, geometry.right),
                    (bottom_address, geometry.bottom),
                ] {
                    self.map.write_typed(*address, value, *kind, self.endian);
                }
            }
        }
        Ok(())
    }

    fn patch_familiar_event(
        &mut self,
        stage: &StageBaseline,
        change: &FamiliarEventChange,
    ) -> Result<()> {
        let event = stage.familiar_events.get(change.event).ok_or_else(|| {
            PatchError::UnresolvedReference(format!(
                "familiar event {} in stage {:?}",
                change.event, stage.name
            ))
        })?;
        if let Some(x) = change.x {
            maybe_write(&mut self.map, &event.x, x, self.endian);
        }
        if let Some(y) = change.y {
            maybe_write(&mut self.map, &event.y, y, self.endian);
        }
        Ok(())
    }

    fn patch_string(
        &mut self,
        stage_index: usize,
        stage: &StageBaseline,
        name: &str,
        new_text: &str,
    ) -> Result<()> {
        let string = stage
            .strings
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                PatchError::Config(format!(
                    "stage {}: no string named {:?}",
                    stage_index, name
                ))
            })?;
        let encoded = text::encode(string.encoding, new_text, string.capacity)?;
        for (i, &byte) in encoded.iter().enumerate() {
            if string.bytes.get(i).copied() != Some(byte) {
                self.map.write_byte(
                    crate::sector::gamedata_to_disc(string.address + i as u64),
                    byte,
                );
            }
        }
        Ok(())
    }
}

/// Resolves a change-set against its baseline into a write map.
pub fn resolve(
    baseline: &Baseline,
    changes: &ChangeSet,
    aliases: &Aliases,
    endian: Endian,
) -> Result<WriteMap> {
    Resolver::new(baseline, changes, aliases, endian).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{FamiliarEventBaseline, RoomBaseline, StringBaseline};
    use crate::changes::{RoomChange, RoomDependents, RoomLocator, Transform};
    use crate::sector::gamedata_to_disc;
    use crate::text::TextEncoding;

    fn tv(value: i64, address: u64) -> TypedValue {
        TypedValue {
            value,
            address,
            kind: ScalarType::U8,
        }
    }

    fn room(left: i64, top: i64, width: i64, height: i64, base: u64) -> RoomBaseline {
        RoomBaseline {
            left: tv(left, base),
            top: tv(top, base + 1),
            right: tv(left + width - 1, base + 2),
            bottom: tv(top + height - 1, base + 3),
        }
    }

    fn empty_stage(name: &str) -> StageBaseline {
        StageBaseline {
            name: name.to_string(),
            rooms: vec![],
            teleporters: vec![],
            boss_teleporters: vec![],
            familiar_events: vec![],
            strings: vec![],
            tilemaps: vec![],
            layout: None,
        }
    }

    fn room_move(stage: usize, room: usize, left: Option<i64>, top: Option<i64>) -> ChangeSet {
        ChangeSet {
            stages: vec![StageChanges {
                stage,
                rooms: vec![RoomChange {
                    room: RoomLocator::Index(room),
                    left,
                    top,
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn moving_left_rewrites_left_and_right_only() {
        // Baseline (5, 10), 4x6; Left -> 7 gives Right 10, Top and
        // Bottom untouched.
        let mut stage = empty_stage("Chapel");
        stage.rooms.push(room(5, 10, 4, 6, 0x100));
        let baseline = Baseline {
            stages: vec![stage],
        };
        let changes = room_move(0, 0, Some(7), None);
        let map = resolve(&baseline, &changes, &Aliases::default(), Endian::Little).unwrap();

        assert_eq!(map.get(gamedata_to_disc(0x100)), Some(7));
        assert_eq!(map.get(gamedata_to_disc(0x101)), None);
        assert_eq!(map.get(gamedata_to_disc(0x102)), Some(10));
        assert_eq!(map.get(gamedata_to_disc(0x103)), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unchanged_room_emits_nothing() {
        let mut stage = empty_stage("Chapel");
        stage.rooms.push(room(5, 10, 4, 6, 0x100));
        let baseline = Baseline {
            stages: vec![stage],
        };
        let changes = room_move(0, 0, Some(5), Some(10));
        let map = resolve(&baseline, &changes, &Aliases::default(), Endian::Little).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn room_dependent_propagates_to_another_stage() {
        // Stage 0 room 0 drives stage 1 room 0 through a flip; the
        // second stage is reached purely via the worklist.
        let mut first = empty_stage("Outer Wall");
        first.rooms.push(room(5, 10, 4, 6, 0x100));
        let mut second = empty_stage("Reverse Outer Wall");
        second.rooms.push(room(50, 40, 4, 6, 0x200));
        let baseline = Baseline {
            stages: vec![first, second],
        };

        let aliases = Aliases {
            rooms: Default::default(),
            dependents: vec![RoomDependents {
                stage: 0,
                room: 0,
                rules: vec![Dependent::Room {
                    stage: 1,
                    room: 0,
                    source: RoomAxis::Left,
                    transform: Transform::Flip { origin: 60 },
                }],
            }],
        };

        let changes = room_move(0, 0, Some(7), None);
        let map = resolve(&baseline, &changes, &aliases, Endian::Little).unwrap();

        // Stage 1 room 0: left 60 - 7 = 53, right 56; top untouched.
        assert_eq!(map.get(gamedata_to_disc(0x200)), Some(53));
        assert_eq!(map.get(gamedata_to_disc(0x202)), Some(56));
        assert_eq!(map.get(gamedata_to_disc(0x201)), None);
    }

    #[test]
    fn direct_write_and_tile_layout_dependents_fire() {
        let mut stage = empty_stage("Library");
        stage.rooms.push(room(5, 10, 4, 6, 0x100));
        let baseline = Baseline {
            stages: vec![stage],
        };
        let aliases = Aliases {
            rooms: Default::default(),
            dependents: vec![RoomDependents {
                stage: 0,
                room: 0,
                rules: vec![
                    Dependent::DirectWrite {
                        address: 0x400,
                        kind: ScalarType::U16,
                        source: RoomAxis::Left,
                        transform: Transform::Add { amount: 100 },
                    },
                    Dependent::TileLayout {
                        left_address: 0x500,
                        top_address: 0x501,
                        right_address: 0x502,
                        bottom_address: 0x503,
                        kind: ScalarType::U8,
                    },
                ],
            }],
        };
        let changes = room_move(0, 0, Some(7), None);
        let map = resolve(&baseline, &changes, &aliases, Endian::Little).unwrap();

        // Direct write: 7 + 100 = 107 as u16.
        assert_eq!(map.get(gamedata_to_disc(0x400)), Some(107));
        assert_eq!(map.get(gamedata_to_disc(0x401)), Some(0));
        // Tile layout record mirrors the new geometry.
        assert_eq!(map.get(gamedata_to_disc(0x500)), Some(7));
        assert_eq!(map.get(gamedata_to_disc(0x501)), Some(10));
        assert_eq!(map.get(gamedata_to_disc(0x502)), Some(10));
        assert_eq!(map.get(gamedata_to_disc(0x503)), Some(15));
    }

    #[test]
    fn familiar_event_dependent_synthesizes_a_change() {
        let mut stage = empty_stage("Hall");
        stage.rooms.push(room(5, 10, 4, 6, 0x100));
        stage.familiar_events.push(FamiliarEventBaseline {
            x: tv(5, 0x300),
            y: tv(10, 0x301),
        });
        let baseline = Baseline {
            stages: vec![stage],
        };
        let aliases = Aliases {
            rooms: Default::default(),
            dependents: vec![RoomDependents {
                stage: 0,
                room: 0,
                rules: vec![Dependent::FamiliarEvent {
                    stage: 0,
                    event: 0,
                    transform: Transform::Identity,
                }],
            }],
        };
        let changes = room_move(0, 0, Some(7), Some(12));
        let map = resolve(&baseline, &changes, &aliases, Endian::Little).unwrap();

        assert_eq!(map.get(gamedata_to_disc(0x300)), Some(7));
        assert_eq!(map.get(gamedata_to_disc(0x301)), Some(12));
    }

    #[test]
    fn secret_map_tile_marks_the_room_bit() {
        let mut stage = empty_stage("Keep");
        stage.rooms.push(room(5, 10, 1, 1, 0x100));
        let baseline = Baseline {
            stages: vec![stage],
        };
        let aliases = Aliases {
            rooms: Default::default(),
            dependents: vec![RoomDependents {
                stage: 0,
                room: 0,
                rules: vec![Dependent::SecretMapTile { base: 0x800 }],
            }],
        };
        // Move to (12, 3): byte 3*8 + 12/8 = 25, bit 1 << (12 % 8).
        let changes = room_move(0, 0, Some(12), Some(3));
        let map = resolve(&baseline, &changes, &aliases, Endian::Little).unwrap();
        assert_eq!(map.get(gamedata_to_disc(0x800 + 25)), Some(1 << 4));
    }

    #[test]
    fn string_change_writes_only_differing_bytes() {
        let mut stage = empty_stage("Entrance");
        // Baseline happens to hold "Mist" menu-encoded and padded.
        stage.strings.push(StringBaseline {
            name: "card".to_string(),
            address: 0x600,
            capacity: 8,
            encoding: TextEncoding::Menu,
            bytes: vec![b'M', b'i', b's', b't', 0, 0, 0, 0],
        });
        let baseline = Baseline {
            stages: vec![stage],
        };
        let changes = ChangeSet {
            stages: vec![StageChanges {
                stage: 0,
                strings: vec![crate::changes::StringChange {
                    name: "card".to_string(),
                    text: "Most".to_string(),
                }],
                ..Default::default()
            }],
        };
        let map = resolve(&baseline, &changes, &Aliases::default(), Endian::Little).unwrap();
        // Only the second letter differs.
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(gamedata_to_disc(0x601)), Some(b'o'));
    }

    #[test]
    fn reprocessing_a_stage_is_idempotent() {
        // The same stage listed twice resolves to the same map as
        // listed once.
        let make_baseline = || {
            let mut stage = empty_stage("Chapel");
            stage.rooms.push(room(5, 10, 4, 6, 0x100));
            Baseline {
                stages: vec![stage],
            }
        };
        let once = resolve(
            &make_baseline(),
            &room_move(0, 0, Some(7), None),
            &Aliases::default(),
            Endian::Little,
        )
        .unwrap();

        let mut twice_changes = room_move(0, 0, Some(7), None);
        twice_changes
            .stages
            .push(twice_changes.stages[0].clone());
        let twice = resolve(
            &make_baseline(),
            &twice_changes,
            &Aliases::default(),
            Endian::Little,
        )
        .unwrap();

        assert_eq!(
            once.iter().collect::<Vec<_>>(),
            twice.iter().collect::<Vec<_>>()
        );
    }
}
