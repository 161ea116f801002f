use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sector::gamedata_to_disc;
use crate::{PatchError, Result};

/// The six scalar kinds the baseline extraction records.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
}

impl ScalarType {
    pub fn size(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::S8 => 1,
            ScalarType::U16 | ScalarType::S16 => 2,
            ScalarType::U32 | ScalarType::S32 => 4,
        }
    }

    /// Parses a kind name as it appears in address-map catalogs.
    pub fn parse(name: &str) -> Result<ScalarType> {
        match name {
            "u8" => Ok(ScalarType::U8),
            "s8" => Ok(ScalarType::S8),
            "u16" => Ok(ScalarType::U16),
            "s16" => Ok(ScalarType::S16),
            "u32" => Ok(ScalarType::U32),
            "s32" => Ok(ScalarType::S32),
            other => Err(PatchError::UnsupportedScalarType(other.to_string())),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Little
    }
}

/// Accumulator of pending byte writes, keyed by disc address. Later
/// writes to the same address overwrite earlier ones.
#[derive(Clone, Debug, Default)]
pub struct WriteMap {
    bytes: BTreeMap<u64, u8>,
}

impl WriteMap {
    pub fn new() -> WriteMap {
        WriteMap::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn write_byte(&mut self, disc: u64, value: u8) {
        self.bytes.insert(disc, value);
    }

    /// Decomposes a scalar into its bytes and records them at
    /// successive gamedata addresses. Signed kinds are stored as
    /// two's complement (masked to the type width, sign bit included
    /// when the value is negative).
    pub fn write_typed(&mut self, gamedata: u64, value: i64, kind: ScalarType, endian: Endian) {
        let size = kind.size();
        let mask: u64 = if size == 8 {
            u64::MAX
        } else {
            (1u64 << (size * 8)) - 1
        };
        let raw = (value as u64) & mask;

        for i in 0..size {
            let shift = match endian {
                Endian::Little => i * 8,
                Endian::Big => (size - 1 - i) * 8,
            };
            let byte = ((raw >> shift) & 0xFF) as u8;
            self.write_byte(gamedata_to_disc(gamedata + i as u64), byte);
        }
    }

    /// Ascending iteration over (disc address, byte) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u8)> + '_ {
        self.bytes.iter().map(|(&a, &b)| (a, b))
    }

    pub fn get(&self, disc: u64) -> Option<u8> {
        self.bytes.get(&disc).copied()
    }
}
