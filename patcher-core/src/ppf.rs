// PPF3.0-style patch container. The file is a 59-byte header followed
// by write records of the form {8-byte LE disc address, 1-byte run
// length, run bytes}. Records are emitted per 128-byte bucket in
// ascending address order with strictly consecutive offsets coalesced,
// so encoding the same write set always produces identical bytes.

use crate::writes::WriteMap;
use crate::{PatchError, Result};

pub const MAGIC: &[u8; 5] = b"PPF30";
pub const METHOD: u8 = 0x02;

const DESCRIPTION_LEN: usize = 50;
const RESERVED_LEN: usize = 3;
const HEADER_LEN: usize = 5 + 1 + DESCRIPTION_LEN + RESERVED_LEN;
const BUCKET_SIZE: u64 = 128;
const MAX_RUN: usize = 255;

/// One decoded write record: `bytes` applied at `address` onward.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatchRecord {
    pub address: u64,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct PatchFile {
    pub description: String,
    pub records: Vec<PatchRecord>,
}

fn description_field(description: &str) -> [u8; DESCRIPTION_LEN] {
    let mut field = [0u8; DESCRIPTION_LEN];
    let raw = description.as_bytes();
    let take = raw.len().min(DESCRIPTION_LEN);
    field[..take].copy_from_slice(&raw[..take]);
    field
}

/// Serializes a write map into the patch container.
pub fn encode(map: &WriteMap, description: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + map.len() * 2);
    out.extend_from_slice(MAGIC);
    out.push(METHOD);
    out.extend_from_slice(&description_field(description));
    out.extend_from_slice(&[0u8; RESERVED_LEN]);

    // The map iterates in ascending disc order already, which is the
    // same as ascending bucket then ascending offset within bucket. A
    // run breaks at any gap, at a bucket boundary, and at 255 bytes.
    let mut run_start: u64 = 0;
    let mut run: Vec<u8> = Vec::new();

    let flush = |start: u64, bytes: &mut Vec<u8>, out: &mut Vec<u8>| {
        if bytes.is_empty() {
            return;
        }
        out.extend_from_slice(&start.to_le_bytes());
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
        bytes.clear();
    };

    for (addr, byte) in map.iter() {
        let continues = !run.is_empty()
            && addr == run_start + run.len() as u64
            && addr / BUCKET_SIZE == run_start / BUCKET_SIZE
            && run.len() < MAX_RUN;
        if !continues {
            flush(run_start, &mut run, &mut out);
            run_start = addr;
        }
        run.push(byte);
    }
    flush(run_start, &mut run, &mut out);

    out
}

/// Parses a patch back into its header and write records. Reading
/// stops at physical EOF or at a zero-length terminator record; a
/// record that would read past EOF is a truncation error.
pub fn decode(raw: &[u8]) -> Result<PatchFile> {
    if raw.len() < HEADER_LEN {
        return Err(PatchError::Config(
            "patch file is too small to contain a header".to_string(),
        ));
    }
    if &raw[..5] != MAGIC {
        return Err(PatchError::Config(
            "patch file does not start with the PPF30 magic".to_string(),
        ));
    }
    if raw[5] != METHOD {
        return Err(PatchError::Config(format!(
            "unsupported patch encoding method 0x{:02X}",
            raw[5]
        )));
    }

    let desc_bytes = &raw[6..6 + DESCRIPTION_LEN];
    let desc_end = desc_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(DESCRIPTION_LEN);
    let description = String::from_utf8_lossy(&desc_bytes[..desc_end]).into_owned();

    let mut records = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < raw.len() {
        if pos + 9 > raw.len() {
            return Err(PatchError::TruncatedPatch { offset: pos });
        }
        let address = u64::from_le_bytes([
            raw[pos],
            raw[pos + 1],
            raw[pos + 2],
            raw[pos + 3],
            raw[pos + 4],
            raw[pos + 5],
            raw[pos + 6],
            raw[pos + 7],
        ]);
        let length = raw[pos + 8] as usize;
        pos += 9;

        // Conventional terminator; the encoder never emits one but
        // the dissector accepts it.
        if length == 0 {
            break;
        }

        if pos + length > raw.len() {
            return Err(PatchError::TruncatedPatch { offset: pos });
        }
        records.push(PatchRecord {
            address,
            bytes: raw[pos..pos + length].to_vec(),
        });
        pos += length;
    }

    Ok(PatchFile {
        description,
        records,
    })
}
