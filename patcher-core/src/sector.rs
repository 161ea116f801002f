// Address translation between the logical gamedata space (contiguous,
// header/ECC-stripped) and physical offsets on the sectored disc image.
//
// Each 2352-byte raw sector carries a 24-byte header, 2048 data bytes
// and a 280-byte error-correction region. Gamedata addresses index the
// concatenation of all data regions.

pub const SECTOR_HEADER: u64 = 24;
pub const SECTOR_DATA: u64 = 2048;
pub const SECTOR_ECC: u64 = 280;
pub const SECTOR_SIZE: u64 = SECTOR_HEADER + SECTOR_DATA + SECTOR_ECC;

/// Maps a gamedata address to its physical disc offset. Total and
/// injective; every gamedata byte lives in exactly one data region.
pub fn gamedata_to_disc(addr: u64) -> u64 {
    let sector = addr / SECTOR_DATA;
    sector * SECTOR_SIZE + SECTOR_HEADER + (addr % SECTOR_DATA)
}

/// Inverse of [`gamedata_to_disc`]. Returns `None` when the disc
/// offset falls inside a sector header or error-correction region,
/// which has no gamedata equivalent.
pub fn disc_to_gamedata(disc: u64) -> Option<u64> {
    let sector = disc / SECTOR_SIZE;
    let offset = disc % SECTOR_SIZE;
    if offset < SECTOR_HEADER || offset >= SECTOR_HEADER + SECTOR_DATA {
        return None;
    }
    Some(sector * SECTOR_DATA + (offset - SECTOR_HEADER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_start_of_image() {
        assert_eq!(gamedata_to_disc(0), 24);
        assert_eq!(disc_to_gamedata(24), Some(0));
    }

    #[test]
    fn maps_across_sector_boundary() {
        // Last data byte of sector 0, first data byte of sector 1.
        assert_eq!(gamedata_to_disc(2047), 24 + 2047);
        assert_eq!(gamedata_to_disc(2048), 2352 + 24);
    }

    #[test]
    fn canonical_worked_example() {
        assert_eq!(gamedata_to_disc(0x049B_EA1C), 88_805_028);
    }

    #[test]
    fn round_trips_data_bytes() {
        for addr in [0u64, 1, 2047, 2048, 4096, 0x049B_EA1C, 77_326_876] {
            assert_eq!(disc_to_gamedata(gamedata_to_disc(addr)), Some(addr));
        }
    }

    #[test]
    fn rejects_header_and_ecc_offsets() {
        // Header bytes of sector 3.
        for off in 0..24u64 {
            assert_eq!(disc_to_gamedata(3 * 2352 + off), None);
        }
        // ECC bytes of sector 3.
        for off in 2072..2352u64 {
            assert_eq!(disc_to_gamedata(3 * 2352 + off), None);
        }
        // First and last data byte of sector 3 still map.
        assert_eq!(disc_to_gamedata(3 * 2352 + 24), Some(3 * 2048));
        assert_eq!(disc_to_gamedata(3 * 2352 + 2071), Some(3 * 2048 + 2047));
    }
}
