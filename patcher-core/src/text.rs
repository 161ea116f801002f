// Game text encoders. The menu encoding stores letters and space as
// their ASCII byte, and escapes digits and a small punctuation set
// behind an 0x82 lead byte; output is null-padded to a 4-byte
// multiple. The shifted encoding stores each unescaped menu byte
// minus 0x20, terminated by 0xFF and null-filled to the field's
// capacity.

use serde::{Deserialize, Serialize};

use crate::{PatchError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    Menu,
    Shifted,
}

const ESCAPE: u8 = 0x82;
const DIGIT_BASE: u8 = 0x4F;
const TERMINATOR: u8 = 0xFF;

fn punctuation_byte(c: char) -> Option<u8> {
    match c {
        ',' => Some(0x43),
        '.' => Some(0x44),
        ':' => Some(0x46),
        ';' => Some(0x47),
        '?' => Some(0x48),
        '!' => Some(0x49),
        '\'' => Some(0x66),
        '-' => Some(0x7C),
        _ => None,
    }
}

fn push_menu_char(c: char, out: &mut Vec<u8>) -> Result<()> {
    if c.is_ascii_alphabetic() || c == ' ' {
        out.push(c as u8);
        return Ok(());
    }
    if let Some(d) = c.to_digit(10) {
        out.push(ESCAPE);
        out.push(DIGIT_BASE + d as u8);
        return Ok(());
    }
    if let Some(b) = punctuation_byte(c) {
        out.push(ESCAPE);
        out.push(b);
        return Ok(());
    }
    Err(PatchError::Config(format!(
        "character {:?} has no menu encoding",
        c
    )))
}

/// Menu encoding, padded with nulls to the next multiple of 4.
/// The padded length must fit the field's capacity.
pub fn encode_menu(text: &str, capacity: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() + 4);
    for c in text.chars() {
        push_menu_char(c, &mut out)?;
    }
    while out.len() % 4 != 0 {
        out.push(0);
    }
    if out.len() > capacity {
        return Err(PatchError::StringCapacity {
            text: text.to_string(),
            capacity,
        });
    }
    Ok(out)
}

/// Shifted encoding, exactly `capacity` bytes: each character's menu
/// byte minus 0x20, then the 0xFF terminator, then nulls. Escaped
/// menu characters (digits, punctuation) have no shifted form.
pub fn encode_shifted(text: &str, capacity: usize) -> Result<Vec<u8>> {
    // Terminator needs one slot of its own.
    if text.chars().count() + 1 > capacity {
        return Err(PatchError::StringCapacity {
            text: text.to_string(),
            capacity,
        });
    }

    let mut out = Vec::with_capacity(capacity);
    for c in text.chars() {
        if !(c.is_ascii_alphabetic() || c == ' ') {
            return Err(PatchError::Config(format!(
                "character {:?} has no shifted encoding",
                c
            )));
        }
        out.push(c as u8 - 0x20);
    }
    out.push(TERMINATOR);
    out.resize(capacity, 0);
    Ok(out)
}

pub fn encode(encoding: TextEncoding, text: &str, capacity: usize) -> Result<Vec<u8>> {
    match encoding {
        TextEncoding::Menu => encode_menu(text, capacity),
        TextEncoding::Shifted => encode_shifted(text, capacity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_letters_are_ascii_with_null_padding() {
        let bytes = encode_menu("Sword", 16).unwrap();
        assert_eq!(bytes, vec![b'S', b'w', b'o', b'r', b'd', 0, 0, 0]);
    }

    #[test]
    fn menu_digits_are_escaped_into_a_contiguous_range() {
        let bytes = encode_menu("No 7", 16).unwrap();
        assert_eq!(bytes, vec![b'N', b'o', b' ', 0x82, 0x4F + 7, 0, 0, 0]);
    }

    #[test]
    fn menu_punctuation_is_escaped() {
        let bytes = encode_menu("Hm.", 8).unwrap();
        assert_eq!(bytes, vec![b'H', b'm', 0x82, 0x44]);
    }

    #[test]
    fn menu_rejects_unmapped_characters() {
        assert!(encode_menu("a\tb", 16).is_err());
    }

    #[test]
    fn menu_overflow_is_a_capacity_error() {
        match encode_menu("Excalibur", 8) {
            Err(PatchError::StringCapacity { capacity: 8, .. }) => {}
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn shifted_shifts_down_and_terminates() {
        let bytes = encode_shifted("Ax e", 8).unwrap();
        assert_eq!(
            bytes,
            vec![0x21, 0x58, 0x00, 0x45, 0xFF, 0, 0, 0]
        );
    }

    #[test]
    fn shifted_requires_room_for_the_terminator() {
        assert!(encode_shifted("abcd", 4).is_err());
        assert_eq!(encode_shifted("abcd", 5).unwrap().len(), 5);
    }
}
