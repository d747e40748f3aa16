use log::{debug, warn};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;

use crate::cursor::ByteCursor;
use crate::encryption::EncryptionState;
use crate::error::{ParseError, XrefError};
use crate::matcher::{Matcher, MatcherKind};
use crate::object_table::ObjectTable;
use crate::parser;
use crate::xref::{self, Xref};
use crate::{Dictionary, Object, ObjectId, PdfDocument, Result};

/// How far from the end of the file `startxref` is searched for.
pub const DEFAULT_STARTXREF_WINDOW: usize = 2048;

/// `/Linearized` must appear this close to the start of the file.
const LINEARIZED_WINDOW: usize = 1024;

/// Options controlling how a document is loaded.
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// User or owner password for encrypted documents. The empty password is tried when unset.
    pub password: Option<String>,
    /// Byte-pattern search used for keyword scans.
    pub matcher: MatcherKind,
    /// Number of trailing bytes searched for the `startxref` keyword.
    pub startxref_window: usize,
    /// Upper bound on the number of objects materialized.
    pub max_objects: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            password: None,
            matcher: MatcherKind::default(),
            startxref_window: DEFAULT_STARTXREF_WINDOW,
            max_objects: None,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_matcher(mut self, matcher: MatcherKind) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_startxref_window(mut self, window: usize) -> Self {
        self.startxref_window = window;
        self
    }

    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = Some(max_objects);
        self
    }
}

impl PdfDocument {
    /// Load a PDF document from a specified file path.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PdfDocument> {
        Self::load_path_with_options(path, LoadOptions::default())
    }

    /// Load a PDF document from a file path with explicit options.
    pub fn load_path_with_options<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<PdfDocument> {
        let mut file = File::open(path)?;
        let capacity = file.metadata()?.len() as usize;
        let mut buffer = Vec::with_capacity(capacity);
        file.read_to_end(&mut buffer)?;
        Self::load_with_options(buffer, options)
    }

    /// Load a PDF document from a memory slice.
    pub fn load_mem(buffer: &[u8]) -> Result<PdfDocument> {
        Self::load_with_options(buffer.to_vec(), LoadOptions::default())
    }

    /// Load a PDF document from an owned buffer. Stream data stay slices of this buffer.
    pub fn load_with_options(buffer: impl Into<Bytes>, options: LoadOptions) -> Result<PdfDocument> {
        let loaded = Reader::new(buffer.into(), options).read()?;
        PdfDocument::assemble(loaded)
    }
}

/// What the reader hands over to document assembly.
pub(crate) struct LoadedFile {
    pub version: String,
    pub trailer: Dictionary,
    pub object_table: ObjectTable,
    pub is_linearized: bool,
}

pub(crate) struct Reader {
    buffer: Bytes,
    options: LoadOptions,
}

impl Reader {
    pub fn new(buffer: Bytes, options: LoadOptions) -> Reader {
        Reader { buffer, options }
    }

    fn cursor(&self) -> ByteCursor {
        ByteCursor::new(self.buffer.clone()).with_matcher(self.options.matcher)
    }

    /// Read whole document.
    pub fn read(mut self) -> Result<LoadedFile> {
        // Offsets count from the header, so anything in front of it is cut away.
        let offset = self
            .options
            .matcher
            .find(&self.buffer, b"%PDF-")
            .ok_or(ParseError::InvalidFileHeader)?;
        if offset > 0 {
            debug!("skipping {offset} bytes in front of the header");
            self.buffer = self.buffer.slice(offset..);
        }

        let version = parser::header(&self.buffer).ok_or(ParseError::InvalidFileHeader)?;
        let is_linearized = self.is_linearized();

        let xref_start = self.xref_start()?;
        let (mut xref, trailer) = self.read_section(xref_start)?;
        self.merge_xref_stream(&mut xref, &trailer)?;

        // Read previous Xrefs of linearized or incremental updated document.
        let mut already_seen = HashSet::from([xref_start]);
        let mut prev_xref_start = trailer.get(b"Prev").and_then(Object::as_i64).ok();
        while let Some(prev) = prev_xref_start {
            let prev = usize::try_from(prev)
                .ok()
                .filter(|&prev| prev < self.buffer.len())
                .ok_or(XrefError::PrevStart)?;
            if !already_seen.insert(prev) {
                warn!("/Prev chain loops back to byte {prev}");
                break;
            }

            let (mut prev_xref, prev_trailer) = self.read_section(prev)?;
            self.merge_xref_stream(&mut prev_xref, &prev_trailer)?;
            xref.merge(prev_xref);
            prev_xref_start = prev_trailer.get(b"Prev").and_then(Object::as_i64).ok();
        }

        let xref_entry_count = xref.max_id().checked_add(1).ok_or(ParseError::InvalidXref)?;
        if xref.size != xref_entry_count {
            warn!(
                "Size entry of trailer dictionary is {}, correct value is {}.",
                xref.size, xref_entry_count
            );
            xref.size = xref.size.max(xref_entry_count);
        }
        debug!("{} cross-reference entries, PDF {version}", xref.len());

        let mut object_table = ObjectTable::new(self.buffer.clone(), xref, self.options.matcher);
        object_table.set_max_objects(self.options.max_objects);
        self.setup_encryption(&mut object_table, &trailer)?;

        Ok(LoadedFile {
            version,
            trailer,
            object_table,
            is_linearized,
        })
    }

    fn is_linearized(&self) -> bool {
        let head = &self.buffer[..self.buffer.len().min(LINEARIZED_WINDOW)];
        self.options.matcher.find(head, b"/Linearized").is_some()
    }

    /// Offset named by the last `startxref` in the trailing window.
    fn xref_start(&self) -> Result<usize> {
        let mut cursor = self.cursor();
        cursor.seek(self.buffer.len().saturating_sub(self.options.startxref_window))?;
        let keyword = cursor.find_last_pattern(b"startxref").ok_or(XrefError::Start)?;
        cursor.seek(keyword + b"startxref".len())?;
        cursor.skip_whitespace();

        let line = cursor.read_line();
        let digits = line.iter().take_while(|c| c.is_ascii_digit()).count();
        let xref_start = std::str::from_utf8(&line[..digits])
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or(XrefError::Start)?;
        if xref_start >= self.buffer.len() {
            return Err(XrefError::Start.into());
        }
        Ok(xref_start)
    }

    /// Reads a classic table with its trailer, or an xref stream, at `offset`.
    fn read_section(&self, offset: usize) -> Result<(Xref, Dictionary)> {
        let mut cursor = self.cursor();
        cursor.seek(offset)?;
        cursor.skip_whitespace();
        if cursor.remaining().starts_with(b"xref") {
            return xref::parse_xref_table(&mut cursor);
        }

        let (id, object) = parser::parse_indirect_object(&mut cursor, None, None)?;
        match object {
            Object::Stream(stream) => {
                debug!("cross-reference stream {} {} R at byte {offset}", id.0, id.1);
                xref::decode_xref_stream(&stream)
            }
            _ => Err(XrefError::Parse.into()),
        }
    }

    /// Merges the `/XRefStm` of a hybrid file's trailer under its table.
    fn merge_xref_stream(&self, xref: &mut Xref, trailer: &Dictionary) -> Result<()> {
        let Some(start) = trailer.try_get_as::<i64>(b"XRefStm")? else {
            return Ok(());
        };
        let start = usize::try_from(start)
            .ok()
            .filter(|&start| start < self.buffer.len())
            .ok_or(XrefError::StreamStart)?;
        let (stream_xref, _) = self.read_section(start)?;
        xref.merge_hybrid(stream_xref);
        Ok(())
    }

    fn setup_encryption(&self, object_table: &mut ObjectTable, trailer: &Dictionary) -> Result<()> {
        let (encrypt_id, encrypt_dict): (Option<ObjectId>, Dictionary) = match trailer.get(b"Encrypt") {
            Err(_) => return Ok(()),
            Ok(Object::Reference(id)) => (Some(*id), object_table.get(*id)?.as_dict()?.clone()),
            Ok(Object::Dictionary(dict)) => (None, dict.clone()),
            Ok(other) => return Err(other.type_error("Dictionary")),
        };

        let file_id = trailer
            .get(b"ID")
            .and_then(Object::as_array)
            .ok()
            .and_then(|ids| ids.first())
            .and_then(|id| id.as_str().ok());
        let password = self.options.password.as_deref().unwrap_or("");
        let state = EncryptionState::decode(&encrypt_dict, file_id, password)?;
        object_table.set_encryption(state, encrypt_id);
        Ok(())
    }
}
