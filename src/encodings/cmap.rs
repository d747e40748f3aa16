use crate::parser::cmap_parser::{parse, CMapSection, CodeLen, SourceCode};
use crate::parser::ParserInput;

use log::error;
use rangemap::RangeInclusiveMap;
use thiserror::Error;

/// Code length used when a CMap declares no codespace ranges.
const DEFAULT_CODE_LEN: CodeLen = 2;

/// A parsed `/ToUnicode` CMap.
///
/// Mappings are kept per code length (1 to 4 bytes): `<0000>` and `<00>` share an integer value
/// but are different codes. The codespace ranges decide how many bytes the next code takes.
#[derive(Debug, Default, Clone)]
pub struct ToUnicodeCMap {
    bf_ranges: [RangeInclusiveMap<SourceCode, BfRangeTarget>; 4],
    codespace: Vec<(SourceCode, SourceCode, CodeLen)>,
}

#[derive(Debug, Error)]
pub enum UnicodeCMapError {
    #[error("could not parse ToUnicode CMap near byte {offset}")]
    Parse { offset: usize },
    #[error("invalid code range {start:X}..{end:X}")]
    InvalidCodeRange { start: SourceCode, end: SourceCode },
}

impl ToUnicodeCMap {
    const REPLACEMENT_CHAR: u16 = 0xfffd;

    pub fn new() -> ToUnicodeCMap {
        ToUnicodeCMap {
            bf_ranges: [(); 4].map(|_| RangeInclusiveMap::new()),
            codespace: Vec::new(),
        }
    }

    pub fn parse(stream_content: &[u8]) -> Result<ToUnicodeCMap, UnicodeCMapError> {
        let cmap_sections = parse(ParserInput::new_extra(stream_content, "cmap"))
            .map_err(|offset| UnicodeCMapError::Parse { offset })?;
        Self::from_sections(cmap_sections)
    }

    fn from_sections(cmap_sections: Vec<CMapSection>) -> Result<ToUnicodeCMap, UnicodeCMapError> {
        let mut cmap = Self::new();
        for section in cmap_sections {
            match section {
                CMapSection::CsRange(ranges) => cmap.codespace.extend(ranges),
                CMapSection::BfChar(char_mappings) => {
                    for ((code, code_len), dst) in char_mappings {
                        cmap.put_char(code, code_len, dst);
                    }
                }
                CMapSection::BfRange(range_mappings) => {
                    for ((start, end, code_len), mut dst_vec) in range_mappings {
                        if end < start {
                            return Err(UnicodeCMapError::InvalidCodeRange { start, end });
                        }
                        let target = match dst_vec.len() {
                            0 => return Err(UnicodeCMapError::InvalidCodeRange { start, end }),
                            1 if dst_vec[0].len() == 1 => BfRangeTarget::UTF16CodePoint {
                                offset: u32::wrapping_sub(dst_vec[0][0] as u32, start),
                            },
                            1 => BfRangeTarget::HexString(dst_vec.remove(0)),
                            _ => BfRangeTarget::ArrayOfHexStrings(dst_vec),
                        };
                        cmap.put(start, end, code_len, target);
                    }
                }
            }
        }
        Ok(cmap)
    }

    pub fn get(&self, code: SourceCode, code_len: CodeLen) -> Option<Vec<u16>> {
        if code_len > 4 || code_len == 0 {
            error!("Code length should be between 1 and 4 bytes, got {code_len}");
            return None;
        }
        use BfRangeTarget::*;

        let bf_ranges_map = &self.bf_ranges[(code_len - 1) as usize];

        bf_ranges_map.get_key_value(&code).and_then(|(range, value)| match value {
            HexString(vec) => {
                let mut ret_vec = vec.clone();
                if let Some(last) = ret_vec.last_mut() {
                    *last = last.wrapping_add((code - range.start()) as u16);
                }
                Some(ret_vec)
            }
            UTF16CodePoint { offset } => Some(vec![u32::wrapping_add(code, *offset) as u16]),
            ArrayOfHexStrings(vec_of_strings) => vec_of_strings.get((code - range.start()) as usize).cloned(),
        })
    }

    pub fn get_or_replacement_char(&self, code: SourceCode, code_len: CodeLen) -> Vec<u16> {
        self.get(code, code_len)
            .unwrap_or(vec![ToUnicodeCMap::REPLACEMENT_CHAR])
    }

    pub fn put(&mut self, src_code_lo: SourceCode, src_code_hi: SourceCode, code_len: CodeLen, target: BfRangeTarget) {
        if code_len > 4 || code_len == 0 {
            error!("Code length should be between 1 and 4 bytes, got {code_len}, ignoring");
            return;
        }
        self.bf_ranges[(code_len - 1) as usize].insert(src_code_lo..=src_code_hi, target)
    }

    pub fn put_char(&mut self, code: SourceCode, code_len: CodeLen, dst: Vec<u16>) {
        let target = if dst.len() == 1 {
            BfRangeTarget::UTF16CodePoint {
                offset: u32::wrapping_sub(dst[0] as u32, code),
            }
        } else {
            BfRangeTarget::HexString(dst)
        };
        self.put(code, code, code_len, target)
    }

    /// Length of the code starting at `bytes`, chosen by the codespace ranges.
    fn code_len(&self, bytes: &[u8]) -> CodeLen {
        if self.codespace.is_empty() {
            return DEFAULT_CODE_LEN;
        }
        for len in 1..=4u8 {
            let Some(code_bytes) = bytes.get(..len as usize) else {
                break;
            };
            let code = read_code(code_bytes);
            let matched = self
                .codespace
                .iter()
                .any(|&(low, high, range_len)| range_len == len && (low..=high).contains(&code));
            if matched {
                return len;
            }
        }
        // No range matches: consume as many bytes as the shortest range.
        self.codespace.iter().map(|&(_, _, len)| len).min().unwrap_or(DEFAULT_CODE_LEN)
    }

    /// Decodes a string operand. Unmapped codes become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut utf16 = Vec::with_capacity(bytes.len());
        let mut rest = bytes;
        while !rest.is_empty() {
            let len = (self.code_len(rest) as usize).min(rest.len());
            let (code_bytes, tail) = rest.split_at(len);
            utf16.extend(self.get_or_replacement_char(read_code(code_bytes), len as CodeLen));
            rest = tail;
        }
        String::from_utf16_lossy(&utf16)
    }
}

fn read_code(bytes: &[u8]) -> SourceCode {
    bytes.iter().fold(0, |code, &byte| (code << 8) | SourceCode::from(byte))
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BfRangeTarget {
    // UTF16-BE encoding is used
    HexString(Vec<u16>),
    // don't store the actual codepoint but rather an offset to the src_code_lo
    // so that consecutive ranges can be mapped to the same value in the range map
    UTF16CodePoint { offset: u32 },
    ArrayOfHexStrings(Vec<Vec<u16>>),
}
