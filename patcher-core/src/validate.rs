// Structural checks on a change-set, run before resolution touches
// the write map. Any violation aborts the whole build; a partial
// patch is never produced from an invalid change-set.

use crate::baseline::Baseline;
use crate::changes::{Aliases, ChangeSet};
use crate::{PatchError, Result};

// Map coordinates are six-bit values.
const COORD_MIN: i64 = 0;
const COORD_MAX: i64 = 63;

fn check_coord(stage: usize, what: &str, value: i64) -> Result<()> {
    if !(COORD_MIN..=COORD_MAX).contains(&value) {
        return Err(PatchError::Validation(format!(
            "stage {}: {} = {} is outside [{}, {}]",
            stage, what, value, COORD_MIN, COORD_MAX
        )));
    }
    Ok(())
}

pub fn check(baseline: &Baseline, changes: &ChangeSet, aliases: &Aliases) -> Result<()> {
    for stage_changes in &changes.stages {
        let stage_index = stage_changes.stage;
        let stage = baseline.stages.get(stage_index).ok_or_else(|| {
            PatchError::Validation(format!(
                "change-set names stage {} but the baseline has {}",
                stage_index,
                baseline.stages.len()
            ))
        })?;

        for change in &stage_changes.rooms {
            let room = aliases.resolve_room(stage_index, &change.room)?;
            if room >= stage.rooms.len() {
                return Err(PatchError::Validation(format!(
                    "stage {}: room {} does not exist in the baseline",
                    stage_index, room
                )));
            }
            if let Some(left) = change.left {
                check_coord(stage_index, "room Left", left)?;
            }
            if let Some(top) = change.top {
                check_coord(stage_index, "room Top", top)?;
            }
        }

        // Teleporter and boss-teleporter changes must name baseline
        // entries; a change against a missing substructure is fatal.
        for change in &stage_changes.teleporters {
            if change.teleporter >= stage.teleporters.len() {
                return Err(PatchError::Validation(format!(
                    "stage {}: teleporter {} does not exist in the baseline",
                    stage_index, change.teleporter
                )));
            }
        }
        for change in &stage_changes.boss_teleporters {
            if change.boss_teleporter >= stage.boss_teleporters.len() {
                return Err(PatchError::Validation(format!(
                    "stage {}: boss teleporter {} does not exist in the baseline",
                    stage_index, change.boss_teleporter
                )));
            }
        }

        for change in &stage_changes.familiar_events {
            if change.event >= stage.familiar_events.len() {
                return Err(PatchError::Validation(format!(
                    "stage {}: familiar event {} does not exist in the baseline",
                    stage_index, change.event
                )));
            }
        }

        for change in &stage_changes.strings {
            if !stage.strings.iter().any(|s| s.name == change.name) {
                return Err(PatchError::Validation(format!(
                    "stage {}: no string named {:?} in the baseline",
                    stage_index, change.name
                )));
            }
        }

        for change in &stage_changes.tilemaps {
            let found = stage
                .tilemaps
                .iter()
                .find(|t| t.room == change.room && t.layer == change.layer);
            let tilemap = found.ok_or_else(|| {
                PatchError::Validation(format!(
                    "stage {}: no tilemap for room {} layer {}",
                    stage_index, change.room, change.layer
                ))
            })?;
            if change.cells.len() != tilemap.width * tilemap.height {
                return Err(PatchError::Validation(format!(
                    "stage {}: tilemap for room {} layer {} has {} cells, expected {}",
                    stage_index,
                    change.room,
                    change.layer,
                    change.cells.len(),
                    tilemap.width * tilemap.height
                )));
            }
        }

        if !stage_changes.layout_edits.is_empty() && stage.layout.is_none() {
            return Err(PatchError::Validation(format!(
                "stage {}: layout edits given but the baseline has no entity table",
                stage_index
            )));
        }
    }

    Ok(())
}
