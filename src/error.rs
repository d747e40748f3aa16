use thiserror::Error;

use crate::encodings::cmap::UnicodeCMapError;
use crate::encryption;
use crate::ObjectId;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An Object has the wrong type, e.g. the Object is an Array where a Name would be expected.
    #[error("object has wrong type; expected type {expected} but found type {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    /// The dictionary carries an unexpected /Type.
    #[error("dictionary has wrong type: expected /{expected} but found /{found}")]
    DictType { expected: &'static str, found: String },
    /// A feature this crate deliberately does not decode.
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
    /// The encountered character encoding is invalid.
    #[error("invalid character encoding")]
    CharacterEncoding,
    /// The stream couldn't be decompressed.
    #[error("couldn't decompress stream: {0}")]
    Decompress(#[from] DecompressError),
    /// Failed to parse input.
    #[error("couldn't parse input: {0}")]
    Parse(#[from] ParseError),
    /// Error when decrypting the contents of the file.
    #[error("decryption error: {0}")]
    Decryption(#[from] encryption::DecryptionError),
    /// The document names a security handler other than /Standard.
    #[error("unsupported security handler /{}", String::from_utf8_lossy(.0))]
    UnsupportedSecurityHandler(Vec<u8>),
    /// Dictionary key was not found.
    #[error("missing required dictionary key \"{0}\"")]
    DictKey(String),
    /// No indirect object could be parsed at the offset given by the cross-reference table.
    #[error("invalid indirect object at byte offset {offset}")]
    IndirectObject { offset: usize },
    /// IO error.
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    /// Found Object ID does not match Expected Object ID.
    #[error("found object ID does not match expected object ID")]
    ObjectIdMismatch,
    /// The cross-reference table has no usable entry for the object.
    #[error("object {} is not in the cross-reference table", display_id(.0))]
    MissingXrefEntry(ObjectId),
    /// Offset in file is invalid.
    #[error("invalid file offset {0}")]
    InvalidOffset(usize),
    /// Page number was not found in document.
    #[error("page number {0} could not be found")]
    PageNumberNotFound(u32),
    /// Dereferencing object failed due to a reference cycle.
    #[error("reference cycle while resolving object {}", display_id(.0))]
    ReferenceCycle(ObjectId),
    /// More objects were materialized than `LoadOptions::max_objects` allows.
    #[error("object limit of {0} reached")]
    ObjectLimit(usize),
    /// Could not parse ToUnicodeCMap.
    #[error("ToUnicode CMap error: {0}")]
    ToUnicodeCMap(#[from] UnicodeCMapError),
    /// Decoding byte vector to UTF8 String failed.
    #[error("UTF-8 error")]
    UTF8,
    /// Error while parsing cross reference table.
    #[error("invalid cross-reference table ({0})")]
    Xref(XrefError),
}

#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("inflate failed: {0}")]
    Flate(std::io::Error),
    #[error("LZW decoding failed: {0}")]
    Lzw(String),
    #[error("decoding ASCII85 failed: {0}")]
    Ascii85(&'static str),
    #[error("decoding ASCIIHex failed: invalid digit 0x{0:02X}")]
    AsciiHex(u8),
    #[error("invalid PNG predictor row tag {0}")]
    PngRowTag(u8),
    #[error("predictor row is truncated ({actual} of {expected} bytes)")]
    TruncatedRow { expected: usize, actual: usize },
    #[error("predictor rows of {colors} x {bits} bits x {columns} columns do not fit {available} bytes")]
    RowSize {
        colors: usize,
        bits: usize,
        columns: usize,
        available: usize,
    },
    #[error("TIFF predictor does not support {0} bits per component")]
    UnsupportedBitDepth(usize),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected end of input")]
    EndOfInput,
    #[error("invalid file header")]
    InvalidFileHeader,
    #[error("invalid file trailer")]
    InvalidTrailer,
    #[error("invalid cross reference table")]
    InvalidXref,
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    /// A token the grammar cannot start an object with.
    #[error("unexpected {} at byte {offset} (line {line}, column {column}): {context:?}", describe_byte(.found))]
    UnexpectedToken {
        offset: usize,
        line: usize,
        column: usize,
        found: Option<u8>,
        context: String,
    },
}

fn display_id(id: &ObjectId) -> String {
    format!("{} {} R", id.0, id.1)
}

fn describe_byte(found: &Option<u8>) -> String {
    match *found {
        Some(byte) if byte.is_ascii_graphic() => format!("'{}'", byte as char),
        Some(byte) => format!("byte 0x{byte:02X}"),
        None => "end of input".to_string(),
    }
}

#[derive(Debug)]
pub enum XrefError {
    /// Could not parse cross reference table.
    Parse,
    /// Could not find start of cross reference table.
    Start,
    /// The trailer's "Prev" field was invalid.
    PrevStart,
    /// The trailer's "XRefStm" field was invalid.
    StreamStart,
    /// The xref stream holds fewer rows than its /Index announces.
    RowCount { expected: usize, actual: usize },
}

impl fmt::Display for XrefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            XrefError::Parse => write!(f, "could not parse xref"),
            XrefError::Start => write!(f, "invalid start value"),
            XrefError::PrevStart => write!(f, "invalid start value in Prev field"),
            XrefError::StreamStart => write!(f, "invalid stream start value"),
            XrefError::RowCount { expected, actual } => {
                write!(f, "xref stream has {actual} rows but /Index announces {expected}")
            }
        }
    }
}

impl std::error::Error for XrefError {}

impl From<XrefError> for Error {
    fn from(err: XrefError) -> Self {
        Error::Xref(err)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Error::UTF8
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Self {
        Error::UTF8
    }
}
