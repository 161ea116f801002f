// Tilemap reconciliation. A target grid is authored sparsely: blank
// cells copy the aligned source cell, authored cells either match a
// rectangle that already exists somewhere in the source layer (a
// "stamp", up to 5x5) or stand as explicit overrides. Only cells whose
// resolved value differs from the aligned baseline cell become writes,
// which keeps untouched tiles out of the patch.

use crate::writes::{Endian, ScalarType, WriteMap};
use crate::{PatchError, Result};

pub const MAX_STAMP: usize = 5;
const CELL_BYTES: u64 = 2;

#[derive(Clone, Debug)]
pub struct TileGrid {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<u16>,
}

impl TileGrid {
    fn at(&self, x: usize, y: usize) -> u16 {
        self.cells[y * self.width + x]
    }

    /// True when the w*h rectangle at (sx, sy) holds exactly `pattern`
    /// in row-major order.
    fn rect_matches(&self, sx: usize, sy: usize, w: usize, h: usize, pattern: &[u16]) -> bool {
        for dy in 0..h {
            for dx in 0..w {
                if self.at(sx + dx, sy + dy) != pattern[dy * w + dx] {
                    return false;
                }
            }
        }
        true
    }

    fn contains_rect(&self, w: usize, h: usize, pattern: &[u16]) -> bool {
        if w > self.width || h > self.height {
            return false;
        }
        for sy in 0..=self.height - h {
            for sx in 0..=self.width - w {
                if self.rect_matches(sx, sy, w, h, pattern) {
                    return true;
                }
            }
        }
        false
    }
}

/// Stamp side pairs ordered by decreasing area, all aspect ratios with
/// sides up to 5.
fn stamp_sizes() -> Vec<(usize, usize)> {
    let mut sizes = Vec::new();
    for w in 1..=MAX_STAMP {
        for h in 1..=MAX_STAMP {
            sizes.push((w, h));
        }
    }
    sizes.sort_by(|a, b| (b.0 * b.1).cmp(&(a.0 * a.1)));
    sizes
}

/// Resolves a partially authored target layer against its source.
/// Returns the fully resolved grid, one value per cell.
pub fn reconcile(source: &TileGrid, target: &[Option<u16>]) -> Result<Vec<u16>> {
    let width = source.width;
    let height = source.height;
    if target.len() != width * height {
        return Err(PatchError::Config(format!(
            "target layer has {} cells, expected {}x{}",
            target.len(),
            width,
            height
        )));
    }

    let mut resolved: Vec<u16> = vec![0; target.len()];
    let mut assigned: Vec<bool> = vec![false; target.len()];

    // Blank target cells copy straight through from the source.
    for i in 0..target.len() {
        if target[i].is_none() {
            resolved[i] = source.cells[i];
            assigned[i] = true;
        }
    }

    // Satisfy the remaining authored cells with the largest source
    // stamps available, restarting from the biggest size after every
    // placement.
    let sizes = stamp_sizes();
    'search: loop {
        for &(w, h) in &sizes {
            if w > width || h > height {
                continue;
            }
            for ty in 0..=height - h {
                for tx in 0..=width - w {
                    let mut pattern = Vec::with_capacity(w * h);
                    let mut open = true;
                    'collect: for dy in 0..h {
                        for dx in 0..w {
                            let idx = (ty + dy) * width + (tx + dx);
                            if assigned[idx] {
                                open = false;
                                break 'collect;
                            }
                            // Open cells are authored by construction.
                            pattern.push(target[idx].unwrap());
                        }
                    }
                    if !open || !source.contains_rect(w, h, &pattern) {
                        continue;
                    }
                    for dy in 0..h {
                        for dx in 0..w {
                            let idx = (ty + dy) * width + (tx + dx);
                            resolved[idx] = pattern[dy * w + dx];
                            assigned[idx] = true;
                        }
                    }
                    continue 'search;
                }
            }
        }
        break;
    }

    // Whatever is still open keeps its explicitly authored value.
    for i in 0..target.len() {
        if !assigned[i] {
            resolved[i] = target[i].unwrap();
        }
    }

    Ok(resolved)
}

/// Emits one u16 write per resolved cell that differs from the
/// baseline layer, addressed row-major from `base`.
pub fn emit_writes(
    map: &mut WriteMap,
    base: u64,
    source: &TileGrid,
    resolved: &[u16],
    endian: Endian,
) {
    for (i, (&new, &old)) in resolved.iter().zip(source.cells.iter()).enumerate() {
        if new != old {
            map.write_typed(base + i as u64 * CELL_BYTES, new as i64, ScalarType::U16, endian);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: usize, height: usize, cells: Vec<u16>) -> TileGrid {
        assert_eq!(cells.len(), width * height);
        TileGrid {
            width,
            height,
            cells,
        }
    }

    #[test]
    fn blank_cells_copy_from_source() {
        let source = grid(2, 2, vec![1, 2, 3, 4]);
        let target = vec![None, None, None, None];
        assert_eq!(reconcile(&source, &target).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn identical_target_produces_zero_writes() {
        let source = grid(3, 2, vec![5, 6, 7, 8, 9, 10]);
        let target: Vec<Option<u16>> = source.cells.iter().map(|&c| Some(c)).collect();
        let resolved = reconcile(&source, &target).unwrap();

        let mut map = WriteMap::new();
        emit_writes(&mut map, 0x1000, &source, &resolved, Endian::Little);
        assert!(map.is_empty());
    }

    #[test]
    fn authored_pattern_found_elsewhere_in_source_is_stamped() {
        // Target re-uses the source's right column pattern on the left.
        let source = grid(3, 2, vec![1, 1, 7, 1, 1, 8]);
        let target = vec![Some(7), None, None, Some(8), None, None];
        let resolved = reconcile(&source, &target).unwrap();
        assert_eq!(resolved, vec![7, 1, 7, 8, 1, 8]);
    }

    #[test]
    fn unmatched_cells_keep_authored_values() {
        let source = grid(2, 2, vec![0, 0, 0, 0]);
        let target = vec![Some(42), None, None, None];
        let resolved = reconcile(&source, &target).unwrap();
        assert_eq!(resolved, vec![42, 0, 0, 0]);

        let mut map = WriteMap::new();
        emit_writes(&mut map, 0, &source, &resolved, Endian::Little);
        // Exactly one changed cell, two bytes.
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn wrong_cell_count_is_rejected() {
        let source = grid(2, 2, vec![0, 0, 0, 0]);
        assert!(reconcile(&source, &[None, None]).is_err());
    }

    #[test]
    fn stamp_sizes_descend_by_area() {
        let sizes = stamp_sizes();
        assert_eq!(sizes[0], (5, 5));
        assert_eq!(sizes.last().copied(), Some((1, 1)));
        for pair in sizes.windows(2) {
            assert!(pair[0].0 * pair[0].1 >= pair[1].0 * pair[1].1);
        }
    }
}
