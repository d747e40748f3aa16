use std::collections::BTreeMap;

use log::trace;

use crate::cursor::ByteCursor;
use crate::error::{ParseError, XrefError};
use crate::parser;
use crate::{Dictionary, Error, Object, Result, Stream};

/// Cross-reference entries by object number.
#[derive(Debug, Clone, Default)]
pub struct Xref {
    pub entries: BTreeMap<u32, XrefEntry>,
    /// The `/Size` announced by the trailer or xref stream.
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// A free entry. Free entries form a linked list through `next` and never resolve.
    Free { next: u32, generation: u16 },
    /// An uncompressed object at a byte offset.
    Normal { offset: u32, generation: u16 },
    /// Object number `index` within the object stream `container`.
    Compressed { container: u32, index: u16 },
}

impl XrefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free { .. })
    }

    /// Generation of objects this entry can resolve. Objects in object streams always have 0.
    pub fn generation(&self) -> u16 {
        match *self {
            XrefEntry::Free { generation, .. } | XrefEntry::Normal { generation, .. } => generation,
            XrefEntry::Compressed { .. } => 0,
        }
    }
}

impl Xref {
    pub fn new(size: u32) -> Xref {
        Xref {
            entries: BTreeMap::new(),
            size,
        }
    }

    pub fn get(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &XrefEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Merges an older section under this one: entries already present win.
    pub fn merge(&mut self, older: Xref) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
        self.size = self.size.max(older.size);
    }

    /// Merges the `/XRefStm` section of a hybrid file. Its entries fill ids the table leaves
    /// out and replace the table's free placeholders.
    pub fn merge_hybrid(&mut self, stream: Xref) {
        for (id, entry) in stream.entries {
            match self.entries.get(&id) {
                None | Some(XrefEntry::Free { .. }) => {
                    self.entries.insert(id, entry);
                }
                Some(_) => {}
            }
        }
        self.size = self.size.max(stream.size);
    }

    /// Highest object number listed, 0 for an empty table.
    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }
}

/// Parses a classic `xref` table and the trailer dictionary that follows it.
///
/// The cursor must be at the `xref` keyword.
pub fn parse_xref_table(cursor: &mut ByteCursor) -> Result<(Xref, Dictionary)> {
    if !cursor.match_literal(b"xref") {
        return Err(XrefError::Parse.into());
    }

    let mut xref = Xref::new(0);
    loop {
        cursor.skip_whitespace();
        if cursor.remaining().starts_with(b"trailer") {
            break;
        }

        let start = read_field(cursor)?;
        skip_spaces(cursor);
        let count = read_field(cursor)?;
        trace!("xref subsection {start} +{count}");

        for index in 0..count {
            cursor.skip_whitespace();
            let offset = read_field(cursor)?;
            skip_spaces(cursor);
            let generation = read_field(cursor)?;
            skip_spaces(cursor);
            let kind = cursor.current();
            cursor.advance();

            let id = start
                .checked_add(index)
                .and_then(|id| u32::try_from(id).ok())
                .ok_or(XrefError::Parse)?;
            let generation = u16::try_from(generation).map_err(|_| XrefError::Parse)?;
            let entry = match kind {
                Some(b'n') => XrefEntry::Normal {
                    offset: u32::try_from(offset).map_err(|_| XrefError::Parse)?,
                    generation,
                },
                Some(b'f') => XrefEntry::Free {
                    next: u32::try_from(offset).unwrap_or(0),
                    generation,
                },
                _ => return Err(XrefError::Parse.into()),
            };
            xref.insert(id, entry);
        }
    }

    let trailer = parse_trailer(cursor)?;
    xref.size = trailer_size(&trailer)?;
    Ok((xref, trailer))
}

fn read_field(cursor: &mut ByteCursor) -> Result<u64> {
    cursor.read_unsigned().map_err(|_| XrefError::Parse.into())
}

fn skip_spaces(cursor: &mut ByteCursor) {
    cursor.skip_while(|c| c == b' ');
}

/// Parses `trailer << ... >>` at the cursor.
fn parse_trailer(cursor: &mut ByteCursor) -> Result<Dictionary> {
    cursor.skip_whitespace();
    if !cursor.match_literal(b"trailer") {
        return Err(ParseError::InvalidTrailer.into());
    }
    match parser::parse_object(cursor, None) {
        Ok(Object::Dictionary(dict)) => Ok(dict),
        _ => Err(ParseError::InvalidTrailer.into()),
    }
}

fn trailer_size(trailer: &Dictionary) -> Result<u32> {
    trailer
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u32::try_from(size).ok())
        .ok_or(Error::Parse(ParseError::InvalidTrailer))
}

fn integer_array(dict: &Dictionary, key: &[u8]) -> Result<Option<Vec<u64>>> {
    let Some(array) = dict.try_get_as::<&Vec<Object>>(key)? else {
        return Ok(None);
    };
    array
        .iter()
        .map(|value| {
            value
                .as_i64()
                .ok()
                .and_then(|value| u64::try_from(value).ok())
                .ok_or(Error::Parse(ParseError::InvalidXref))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn read_big_endian(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |value, &byte| (value << 8) | u64::from(byte))
}

/// Decodes the rows of a `/Type /XRef` stream. Returns the entries and the stream dictionary,
/// which doubles as the trailer.
pub fn decode_xref_stream(stream: &Stream) -> Result<(Xref, Dictionary)> {
    let dict = &stream.dict;
    let size = trailer_size(dict).map_err(|_| ParseError::InvalidXref)?;
    let widths = integer_array(dict, b"W")?.ok_or(ParseError::InvalidXref)?;
    if widths.len() < 3 || widths.iter().any(|&width| width > 8) {
        return Err(ParseError::InvalidXref.into());
    }
    let widths = [widths[0] as usize, widths[1] as usize, widths[2] as usize];
    let row_width: usize = widths.iter().sum();
    if row_width == 0 {
        return Err(ParseError::InvalidXref.into());
    }

    let index = integer_array(dict, b"Index")?.unwrap_or_else(|| vec![0, u64::from(size)]);
    if index.len() % 2 != 0 {
        return Err(ParseError::InvalidXref.into());
    }
    let expected = index
        .chunks_exact(2)
        .try_fold(0_usize, |total, pair| {
            usize::try_from(pair[1]).ok().and_then(|count| total.checked_add(count))
        })
        .ok_or(ParseError::InvalidXref)?;

    let data = stream.decoded_content()?;
    let actual = data.len() / row_width;
    if data.len() % row_width != 0 || actual != expected {
        return Err(XrefError::RowCount { expected, actual }.into());
    }

    let mut xref = Xref::new(size);
    let mut rows = data.chunks_exact(row_width);
    for pair in index.chunks_exact(2) {
        let (start, count) = (pair[0], pair[1]);
        for i in 0..count {
            let Some(row) = rows.next() else {
                return Err(XrefError::Parse.into());
            };
            let (kind, rest) = row.split_at(widths[0]);
            let (field2, field3) = rest.split_at(widths[1]);
            // A zero-width type field means every row is a normal entry.
            let kind = if widths[0] == 0 { 1 } else { read_big_endian(kind) };
            let field2 = read_big_endian(field2);
            let field3 = read_big_endian(field3);

            let id = u32::try_from(start + i).map_err(|_| XrefError::Parse)?;
            let entry = match kind {
                0 => XrefEntry::Free {
                    next: field2 as u32,
                    generation: field3 as u16,
                },
                1 => XrefEntry::Normal {
                    offset: u32::try_from(field2).map_err(|_| XrefError::Parse)?,
                    generation: field3 as u16,
                },
                2 => XrefEntry::Compressed {
                    container: u32::try_from(field2).map_err(|_| XrefError::Parse)?,
                    index: field3 as u16,
                },
                other => {
                    // Unknown entry types are references to the null object.
                    trace!("xref stream row for object {id} has type {other}");
                    continue;
                }
            };
            xref.insert(id, entry);
        }
    }

    let mut trailer = dict.clone();
    for key in [&b"Length"[..], b"W", b"Index", b"Filter", b"DecodeParms"] {
        trailer.remove(key);
    }
    Ok((xref, trailer))
}
