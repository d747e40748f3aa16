use log::{debug, warn};

use crate::encryption::{EncryptionState, Permissions};
use crate::object::Name;
use crate::object_table::ObjectTable;
use crate::page::{self, Page};
use crate::reader::LoadedFile;
use crate::xref::XrefEntry;
use crate::{Dictionary, Error, Object, ObjectId, Result};

/// A loaded PDF document: the lazy object table plus the resolved page list.
#[derive(Debug)]
pub struct PdfDocument {
    /// The version of the PDF specification to which the file conforms.
    pub version: String,
    /// The newest trailer (or cross-reference stream dictionary).
    pub trailer: Trailer,
    /// All indirect objects of the file, resolved on first access.
    pub object_table: ObjectTable,
    pub catalog: Catalog,
    /// Leaves of the page tree in document order.
    pub pages: Vec<Page>,
    /// `/Linearized` appears near the start of the file.
    pub is_linearized: bool,
    pub encryption: Option<EncryptionInfo>,
}

impl PdfDocument {
    pub(crate) fn assemble(loaded: LoadedFile) -> Result<PdfDocument> {
        let LoadedFile {
            version,
            trailer,
            object_table,
            is_linearized,
        } = loaded;
        let trailer = Trailer(trailer);

        let catalog_id = trailer.root()?;
        let catalog = Catalog::new(catalog_id, object_table.get(catalog_id)?.as_dict()?.clone());
        if !catalog.dict.has_type(b"Catalog") {
            warn!("document catalog {} {} R lacks /Type /Catalog", catalog_id.0, catalog_id.1);
        }

        let pages = page::collect_pages(catalog.pages()?, &object_table)?;
        debug!("{} pages", pages.len());
        let encryption = object_table.encryption_state().map(EncryptionInfo::from);

        Ok(PdfDocument {
            version,
            trailer,
            object_table,
            catalog,
            pages,
            is_linearized,
            encryption,
        })
    }

    /// Page by its 1-based number.
    pub fn page(&self, number: u32) -> Result<&Page> {
        number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .ok_or(Error::PageNumberNotFound(number))
    }

    /// Resolves an object by id.
    pub fn get_object(&self, id: ObjectId) -> Result<&Object> {
        self.object_table.get(id)
    }

    /// The document information dictionary, when the trailer names one.
    pub fn info(&self) -> Result<Option<&Dictionary>> {
        match self.trailer.0.get(b"Info") {
            Ok(info) => Ok(Some(self.object_table.dereference(info)?.as_dict()?)),
            Err(_) => Ok(None),
        }
    }

    /// Linearization parameters of a linearized file.
    pub fn linearization(&self) -> Result<Option<LinearizationInfo>> {
        if !self.is_linearized {
            return Ok(None);
        }
        let first = self
            .object_table
            .xref()
            .iter()
            .filter_map(|(number, entry)| match *entry {
                XrefEntry::Normal { offset, generation } => Some((offset, (number, generation))),
                _ => None,
            })
            .min();
        let Some((_, id)) = first else {
            return Ok(None);
        };
        match self.object_table.get(id)? {
            Object::Dictionary(dict) if dict.has(b"Linearized") => Ok(Some(LinearizationInfo(dict.clone()))),
            _ => {
                warn!("first object {} {} R is not a linearization dictionary", id.0, id.1);
                Ok(None)
            }
        }
    }
}

/// Hand-written accessors over the trailer dictionary.
#[derive(Debug, Clone)]
pub struct Trailer(pub Dictionary);

impl Trailer {
    pub fn root(&self) -> Result<ObjectId> {
        self.0.get_as(b"Root")
    }

    pub fn size(&self) -> Result<i64> {
        self.0.get_as(b"Size")
    }

    pub fn info(&self) -> Result<Option<ObjectId>> {
        self.0.try_get_as(b"Info")
    }

    /// The `/Encrypt` entry, a reference or an inline dictionary.
    pub fn encrypt(&self) -> Option<&Object> {
        self.0.get(b"Encrypt").ok()
    }

    /// The permanent and changing file identifiers.
    pub fn ids(&self) -> Option<(&[u8], &[u8])> {
        match self.0.get(b"ID").and_then(Object::as_array).ok()?.as_slice() {
            [first, second, ..] => Some((first.as_str().ok()?, second.as_str().ok()?)),
            _ => None,
        }
    }

    /// The first file identifier, used in key derivation.
    pub fn file_id(&self) -> Option<&[u8]> {
        self.ids().map(|(first, _)| first)
    }

    pub fn prev(&self) -> Option<i64> {
        self.0.get(b"Prev").and_then(Object::as_i64).ok()
    }

    pub fn xref_stm(&self) -> Option<i64> {
        self.0.get(b"XRefStm").and_then(Object::as_i64).ok()
    }
}

/// The document catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub id: ObjectId,
    pub dict: Dictionary,
}

impl Catalog {
    pub fn new(id: ObjectId, dict: Dictionary) -> Catalog {
        Catalog { id, dict }
    }

    /// Root of the page tree.
    pub fn pages(&self) -> Result<ObjectId> {
        self.dict.get_as(b"Pages")
    }

    /// A `/Version` overriding the header's.
    pub fn version(&self) -> Result<Option<&[u8]>> {
        Ok(self.dict.try_get_as::<Name>(b"Version")?.map(|name| name.0))
    }

    pub fn page_layout(&self) -> Result<Option<&[u8]>> {
        Ok(self.dict.try_get_as::<Name>(b"PageLayout")?.map(|name| name.0))
    }

    pub fn page_mode(&self) -> Result<Option<&[u8]>> {
        Ok(self.dict.try_get_as::<Name>(b"PageMode")?.map(|name| name.0))
    }

    /// The interactive form, a reference or an inline dictionary.
    pub fn acro_form(&self) -> Option<&Object> {
        self.dict.get(b"AcroForm").ok()
    }

    pub fn metadata(&self) -> Result<Option<ObjectId>> {
        self.dict.try_get_as(b"Metadata")
    }
}

/// What the standard security handler reported for an encrypted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub version: i64,
    pub revision: i64,
    pub permissions: Permissions,
    pub encrypt_metadata: bool,
    /// `/CFM` of the filter applied to streams, e.g. `V2` or `AESV2`.
    pub stream_method: Vec<u8>,
    pub string_method: Vec<u8>,
    /// Length of the file encryption key in bytes.
    pub key_length: usize,
}

impl From<&EncryptionState> for EncryptionInfo {
    fn from(state: &EncryptionState) -> Self {
        EncryptionInfo {
            version: state.version,
            revision: state.revision,
            permissions: state.permissions,
            encrypt_metadata: state.encrypt_metadata,
            stream_method: state.stream_filter.method().to_vec(),
            string_method: state.string_filter.method().to_vec(),
            key_length: state.file_encryption_key.len(),
        }
    }
}

/// The linearization parameter dictionary, the first object of a linearized file.
#[derive(Debug, Clone)]
pub struct LinearizationInfo(pub Dictionary);

impl LinearizationInfo {
    /// File length the parameters were written for.
    pub fn file_length(&self) -> Result<i64> {
        self.0.get_as(b"L")
    }

    pub fn page_count(&self) -> Result<i64> {
        self.0.get_as(b"N")
    }

    /// Object number of the first page's page object.
    pub fn first_page_object(&self) -> Result<i64> {
        self.0.get_as(b"O")
    }

    /// Offset of the end of the first page.
    pub fn first_page_end(&self) -> Result<i64> {
        self.0.get_as(b"E")
    }

    /// Offset of the first entry of the main cross-reference table.
    pub fn main_xref_offset(&self) -> Result<i64> {
        self.0.get_as(b"T")
    }

    /// Offset and length of the primary hint stream (and of the overflow stream, if any).
    pub fn hint_stream(&self) -> Result<Vec<i64>> {
        let hints: &Vec<Object> = self.0.get_as(b"H")?;
        hints.iter().map(Object::as_i64).collect()
    }
}
