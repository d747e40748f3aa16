pub mod cmap;

use cmap::ToUnicodeCMap;
use encoding_rs::WINDOWS_1252;

/// Turns the bytes of a string operand into text.
#[derive(Debug, Clone)]
pub enum CharacterMapper {
    /// The font's `/ToUnicode` CMap.
    ToUnicode(ToUnicodeCMap),
    /// `/WinAnsiEncoding` simple fonts.
    WinAnsi,
    /// Each byte stands for the character with the same value.
    Identity,
}

impl CharacterMapper {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            CharacterMapper::ToUnicode(cmap) => cmap.decode(bytes),
            CharacterMapper::WinAnsi => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
            CharacterMapper::Identity => bytes.iter().map(|&byte| char::from(byte)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_ansi_differs_from_latin1() {
        let bytes = b"\x93quoted\x94 \x80 caf\xe9";
        assert_eq!(CharacterMapper::WinAnsi.decode(bytes), "\u{201C}quoted\u{201D} \u{20AC} caf\u{e9}");
        assert_eq!(CharacterMapper::Identity.decode(b"caf\xe9"), "caf\u{e9}");
    }
}
